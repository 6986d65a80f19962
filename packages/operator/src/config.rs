use eyre::{eyre, Result, WrapErr};
use multichain_rs::{ChainFamily, ChainId, ScanCursor};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Main configuration for the operator
#[derive(Debug, Clone)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub operator: OperatorConfig,
    pub database: DatabaseConfig,
    pub tss: TssConfig,
    pub chains: Vec<ChainConfig>,
    pub solana: SolanaConfig,
    pub bitcoin: BitcoinConfig,
}

/// Where votes and queries go
#[derive(Clone, PartialEq)]
pub enum LedgerConfig {
    /// Remote ledger daemon over HTTP
    Remote {
        url: String,
        auth_token: Option<String>,
    },
    /// In-process single-validator ledger (devnet)
    Local,
}

/// Custom Debug that redacts the auth token.
impl fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerConfig::Remote { url, auth_token } => f
                .debug_struct("Remote")
                .field("url", url)
                .field("auth_token", &auth_token.as_ref().map(|_| "<redacted>"))
                .finish(),
            LedgerConfig::Local => f.write_str("Local"),
        }
    }
}

/// Operator identity and pipeline knobs
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Voter identity registered in the ledger's observer set
    pub address: String,
    pub restricted_addresses: Vec<String>,
    pub api_port: u16,
    pub max_items_per_scan: usize,
    pub outbound_tx_timeout_secs: u64,
    /// Per-chain scan start overrides (`CHAIN_{id}_START_CURSOR`)
    pub start_cursors: HashMap<ChainId, StartCursor>,
}

impl OperatorConfig {
    pub fn outbound_tx_timeout(&self) -> Duration {
        Duration::from_secs(self.outbound_tx_timeout_secs)
    }
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Local stand-in for the TSS key share
#[derive(Clone)]
pub struct TssConfig {
    pub private_key: String,
}

/// Custom Debug that redacts the key share to prevent accidental log leakage.
impl fmt::Debug for TssConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TssConfig")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// One external chain this operator serves
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub family: ChainFamily,
    pub rpc_url: String,
    /// Gateway contract / program; the TSS address on Bitcoin
    pub gateway: String,
    pub enabled: bool,
}

#[derive(Clone, Default)]
pub struct SolanaConfig {
    pub fee_payer_key: Option<String>,
}

/// Custom Debug that redacts the fee payer keypair.
impl fmt::Debug for SolanaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaConfig")
            .field(
                "fee_payer_key",
                &self.fee_payer_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct BitcoinConfig {
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
}

/// Custom Debug that redacts the RPC password.
impl fmt::Debug for BitcoinConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitcoinConfig")
            .field("rpc_user", &self.rpc_user)
            .field(
                "rpc_password",
                &self.rpc_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Where the inbound scan of a chain begins at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartCursor {
    /// Skip history and start at the chain head
    Latest,
    At(ScanCursor),
}

impl StartCursor {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("latest") {
            StartCursor::Latest
        } else {
            StartCursor::At(ScanCursor::decode(raw))
        }
    }

    pub fn into_scan_cursor(self) -> ScanCursor {
        match self {
            StartCursor::Latest => ScanCursor::Unset,
            StartCursor::At(cursor) => cursor,
        }
    }
}

/// Default functions
fn default_database_url() -> String {
    "sqlite://operator.db".to_string()
}

fn default_api_port() -> u16 {
    9092
}

fn default_max_items_per_scan() -> usize {
    100
}

fn default_outbound_tx_timeout_secs() -> u64 {
    120
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    fn load_from_env() -> Result<Self> {
        let ledger = match env::var("LEDGER_MODE").ok().as_deref() {
            Some("local") => LedgerConfig::Local,
            Some("remote") | None => LedgerConfig::Remote {
                url: env::var("LEDGER_URL").map_err(|_| {
                    eyre!("LEDGER_URL environment variable is required (or set LEDGER_MODE=local)")
                })?,
                auth_token: optional_var("LEDGER_AUTH_TOKEN"),
            },
            Some(other) => return Err(eyre!("LEDGER_MODE must be 'local' or 'remote', got '{}'", other)),
        };

        let chains = load_chains()?;

        let mut start_cursors = HashMap::new();
        for chain in &chains {
            if let Some(raw) = optional_var(&format!("CHAIN_{}_START_CURSOR", chain.chain_id)) {
                start_cursors.insert(chain.chain_id, StartCursor::parse(&raw));
            }
        }

        let operator = OperatorConfig {
            address: env::var("OPERATOR_ADDRESS")
                .map_err(|_| eyre!("OPERATOR_ADDRESS environment variable is required"))?,
            restricted_addresses: parse_list(&env::var("RESTRICTED_ADDRESSES").unwrap_or_default()),
            api_port: env::var("API_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_api_port()),
            max_items_per_scan: env::var("MAX_ITEMS_PER_SCAN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_max_items_per_scan()),
            outbound_tx_timeout_secs: env::var("OUTBOUND_TX_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_outbound_tx_timeout_secs()),
            start_cursors,
        };

        let config = Config {
            ledger,
            operator,
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| default_database_url()),
            },
            tss: TssConfig {
                private_key: env::var("TSS_PRIVATE_KEY")
                    .map_err(|_| eyre!("TSS_PRIVATE_KEY environment variable is required"))?,
            },
            chains,
            solana: SolanaConfig {
                fee_payer_key: optional_var("SOLANA_FEE_PAYER_KEY"),
            },
            bitcoin: BitcoinConfig {
                rpc_user: optional_var("BITCOIN_RPC_USER"),
                rpc_password: optional_var("BITCOIN_RPC_PASSWORD"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Chains with `enabled = true`
    pub fn enabled_chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.iter().filter(|c| c.enabled)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let LedgerConfig::Remote { url, .. } = &self.ledger {
            if url.is_empty() {
                return Err(eyre!("LEDGER_URL cannot be empty"));
            }
        }

        if self.operator.address.trim().is_empty() {
            return Err(eyre!("OPERATOR_ADDRESS cannot be empty"));
        }

        if self.database.url.is_empty() {
            return Err(eyre!("DATABASE_URL cannot be empty"));
        }

        let key = self.tss.private_key.trim_start_matches("0x");
        if key.len() != 64 || hex::decode(key).is_err() {
            return Err(eyre!("TSS_PRIVATE_KEY must be 32 bytes of hex"));
        }

        if self.operator.max_items_per_scan == 0 {
            return Err(eyre!("MAX_ITEMS_PER_SCAN must be greater than zero"));
        }

        if self.operator.outbound_tx_timeout_secs == 0 {
            return Err(eyre!("OUTBOUND_TX_TIMEOUT_SECS must be greater than zero"));
        }

        if self.enabled_chains().next().is_none() {
            return Err(eyre!("At least one enabled chain must be configured"));
        }

        // Two workers on one chain would race on the scan cursor and nonces
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                return Err(eyre!("Duplicate chain ID: {}", chain.chain_id));
            }
            if chain.rpc_url.is_empty() {
                return Err(eyre!("RPC URL for chain {} cannot be empty", chain.chain_id));
            }
            if chain.gateway.is_empty() {
                return Err(eyre!("Gateway for chain {} cannot be empty", chain.chain_id));
            }
            if !chain.enabled {
                continue;
            }
            match chain.family {
                ChainFamily::Evm => {
                    if chain.gateway.len() != 42 || !chain.gateway.starts_with("0x") {
                        return Err(eyre!(
                            "Gateway for EVM chain {} must be a hex address (42 chars with 0x prefix)",
                            chain.chain_id
                        ));
                    }
                }
                ChainFamily::Solana => {
                    if self.solana.fee_payer_key.is_none() {
                        return Err(eyre!(
                            "SOLANA_FEE_PAYER_KEY is required for Solana chain {}",
                            chain.chain_id
                        ));
                    }
                }
                ChainFamily::Bitcoin => {
                    if self.bitcoin.rpc_user.is_none() || self.bitcoin.rpc_password.is_none() {
                        return Err(eyre!(
                            "BITCOIN_RPC_USER and BITCOIN_RPC_PASSWORD are required for Bitcoin chain {}",
                            chain.chain_id
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Load `CHAINS_COUNT` chain blocks (`CHAIN_1_*` ..= `CHAIN_n_*`)
fn load_chains() -> Result<Vec<ChainConfig>> {
    let count: usize = env::var("CHAINS_COUNT")
        .map_err(|_| eyre!("CHAINS_COUNT environment variable is required"))?
        .parse()
        .wrap_err("CHAINS_COUNT must be a valid number")?;

    let mut chains = Vec::with_capacity(count);
    for i in 1..=count {
        let prefix = format!("CHAIN_{}", i);

        let chain_id = env::var(format!("{}_ID", prefix))
            .map_err(|_| eyre!("Missing {}_ID", prefix))?
            .parse()
            .wrap_err_with(|| format!("Invalid {}_ID", prefix))?;

        let family = env::var(format!("{}_FAMILY", prefix))
            .map_err(|_| eyre!("Missing {}_FAMILY", prefix))?
            .parse()
            .wrap_err_with(|| format!("Invalid {}_FAMILY", prefix))?;

        let rpc_url = env::var(format!("{}_RPC_URL", prefix))
            .map_err(|_| eyre!("Missing {}_RPC_URL", prefix))?;

        let gateway = env::var(format!("{}_GATEWAY", prefix))
            .map_err(|_| eyre!("Missing {}_GATEWAY", prefix))?;

        let enabled: bool = env::var(format!("{}_ENABLED", prefix))
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(true);

        chains.push(ChainConfig {
            chain_id,
            family,
            rpc_url,
            gateway,
            enabled,
        });
    }

    Ok(chains)
}
