use anyhow::{Context, bail};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Shard index is the position in this list
    pub shards: Vec<ShardConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CoordinatorConfig {
    /// Upper bound for every call into a shard. Unset means wait forever.
    #[serde(default)]
    pub branch_timeout_ms: Option<u64>,
}

impl CoordinatorConfig {
    pub fn branch_timeout(&self) -> Option<Duration> {
        self.branch_timeout_ms.map(Duration::from_millis)
    }
}

/// Resource manager backing one shard
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShardConfig {
    Mysql(MySqlShardConfig),
    Memory(MemoryShardConfig),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MySqlShardConfig {
    pub url: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_balance_column")]
    pub balance_column: String,
}

fn default_table() -> String {
    "contas".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_balance_column() -> String {
    "saldo".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MemoryShardConfig {
    #[serde(default)]
    pub accounts: BTreeMap<u64, Decimal>,
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config: {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.shards.is_empty() {
            bail!("at least one shard must be configured");
        }
        for (index, shard) in self.shards.iter().enumerate() {
            if let ShardConfig::Mysql(mysql) = shard {
                for ident in [&mysql.table, &mysql.id_column, &mysql.balance_column] {
                    if !is_sql_identifier(ident) {
                        bail!("shard {}: '{}' is not a plain SQL identifier", index, ident);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Identifiers are spliced into SQL text, so only `[A-Za-z_][A-Za-z0-9_]*` is allowed.
fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
