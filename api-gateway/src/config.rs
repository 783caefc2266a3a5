//! HTTP listener configuration

use std::env;

/// Listening addresses of the two HTTP surfaces
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address of the account (users) API
    pub account_addr: String,
    /// Address of the ledger (transactions) API
    pub ledger_addr: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            account_addr: env::var("ACCOUNT_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            ledger_addr: env::var("LEDGER_ADDR").unwrap_or_else(|_| "127.0.0.1:8081".to_string()),
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }
}
