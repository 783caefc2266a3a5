// This is a metapackage for tests
// Re-export the workspace crates so cross-crate tests can reach them by one path

pub use account_service;
pub use api_gateway;
pub use common;
pub use ledger_service;
