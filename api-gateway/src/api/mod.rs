//! API handlers
//!
//! This module contains all the API endpoint handlers organized by resource.
//! Each handler follows a consistent pattern:
//! - Extract state and parameters using Axum extractors
//! - Map extractor rejections to a 400
//! - Call the appropriate service methods
//! - Return the plain JSON body of the resource

pub mod transactions;
pub mod users;
