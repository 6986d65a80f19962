//! Ledger daemon configuration

use eyre::{eyre, Result, WrapErr};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use crate::keeper::{LedgerConfig, DEFAULT_THRESHOLD};
use crate::state::ChainParams;

/// Configuration for `bridge-ledgerd`
#[derive(Clone)]
pub struct DaemonConfig {
    pub bind: SocketAddr,
    pub threshold: usize,
    pub observers: Vec<String>,
    pub admins: Vec<String>,
    pub block_time_ms: u64,
    pub chain_params: Vec<ChainParams>,
    /// Bearer token -> identity it may act as; empty leaves `/execute` open
    pub api_tokens: HashMap<String, String>,
}

/// Observer and admin identities and API tokens are listed by count only.
impl fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("bind", &self.bind)
            .field("threshold", &self.threshold)
            .field("observers", &self.observers.len())
            .field("admins", &self.admins.len())
            .field("block_time_ms", &self.block_time_ms)
            .field(
                "chain_params",
                &self
                    .chain_params
                    .iter()
                    .map(|p| p.chain_id.as_u64())
                    .collect::<Vec<_>>(),
            )
            .field("api_tokens", &self.api_tokens.len())
            .finish()
    }
}

fn default_bind() -> String {
    "127.0.0.1:26657".to_string()
}

fn default_block_time_ms() -> u64 {
    1000
}

/// Split a comma separated list, dropping blanks
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `token:identity` pairs separated by commas
pub fn parse_tokens(raw: &str) -> Result<HashMap<String, String>> {
    let mut tokens = HashMap::new();
    for entry in parse_list(raw) {
        let (token, identity) = entry
            .split_once(':')
            .map(|(t, i)| (t.trim(), i.trim()))
            .filter(|(t, i)| !t.is_empty() && !i.is_empty())
            .ok_or_else(|| eyre!("LEDGER_API_TOKENS entries must be token:identity"))?;
        if tokens.insert(token.to_string(), identity.to_string()).is_some() {
            return Err(eyre!("LEDGER_API_TOKENS lists a token twice"));
        }
    }
    Ok(tokens)
}

impl DaemonConfig {
    /// Load from `.env` (if present) and the environment
    pub fn load() -> Result<Self> {
        if Path::new(".env").exists() {
            dotenvy::from_filename(".env").wrap_err("Failed to load .env file")?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let bind_raw = env::var("LEDGER_BIND").unwrap_or_else(|_| default_bind());
        let bind = bind_raw
            .parse()
            .wrap_err_with(|| format!("LEDGER_BIND '{}' is not a socket address", bind_raw))?;

        let threshold = match env::var("LEDGER_THRESHOLD") {
            Ok(v) => v.parse().wrap_err("LEDGER_THRESHOLD must be a positive integer")?,
            Err(_) => DEFAULT_THRESHOLD,
        };

        let observers = parse_list(
            &env::var("LEDGER_OBSERVERS")
                .map_err(|_| eyre!("LEDGER_OBSERVERS environment variable is required"))?,
        );
        let admins = parse_list(&env::var("LEDGER_ADMINS").unwrap_or_default());

        let block_time_ms = env::var("LEDGER_BLOCK_TIME_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_block_time_ms());

        let chain_params = match env::var("LEDGER_CHAIN_PARAMS") {
            Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .wrap_err("LEDGER_CHAIN_PARAMS must be a JSON list of chain params")?,
            _ => Vec::new(),
        };

        let api_tokens = parse_tokens(&env::var("LEDGER_API_TOKENS").unwrap_or_default())?;

        let config = Self {
            bind,
            threshold,
            observers,
            admins,
            block_time_ms,
            chain_params,
            api_tokens,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_time_ms == 0 {
            return Err(eyre!("LEDGER_BLOCK_TIME_MS must be greater than zero"));
        }
        self.ledger_config()?;
        for identity in self.api_tokens.values() {
            if !self.observers.contains(identity) && !self.admins.contains(identity) {
                return Err(eyre!(
                    "LEDGER_API_TOKENS maps a token to {}, who is neither observer nor admin",
                    identity
                ));
            }
        }
        for p in &self.chain_params {
            p.validate()
                .map_err(|e| eyre!("chain {}: {}", p.chain_id, e))?;
        }
        Ok(())
    }

    /// Voter set for the ledger keeper
    pub fn ledger_config(&self) -> Result<LedgerConfig> {
        let observers: Vec<&str> = self.observers.iter().map(String::as_str).collect();
        let admins: Vec<&str> = self.admins.iter().map(String::as_str).collect();
        LedgerConfig::new(self.threshold, &observers, &admins).map_err(|e| eyre!(e))
    }
}
