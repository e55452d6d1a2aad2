use std::time::Duration;

use crate::domain::{Error, Money};
use crate::ledger::DEFAULT_MAX_FUND_REQUEST;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub lock_timeout: Duration,
    pub max_fund_request: Money,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(5_000),
            max_fund_request: DEFAULT_MAX_FUND_REQUEST,
            database_url: None,
            max_connections: 10,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("LEDGER_LOCK_TIMEOUT_MS") {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("LEDGER_LOCK_TIMEOUT_MS={}: {}", raw, e)))?;
            config.lock_timeout = Duration::from_millis(ms);
        }

        if let Some(raw) = lookup("LEDGER_MAX_FUND_REQUEST") {
            config.max_fund_request = Money::from_decimal_str(&raw)
                .filter(|m| m.is_positive())
                .ok_or_else(|| Error::Config(format!("LEDGER_MAX_FUND_REQUEST={}", raw)))?;
        }

        config.database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        if let Some(raw) = lookup("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("DATABASE_MAX_CONNECTIONS={}: {}", raw, e)))?;
        }

        Ok(config)
    }
}
