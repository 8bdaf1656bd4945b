use clap::{Args, Parser};
use serde::{Deserialize, Serialize};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_DB_PATH: &str = "festa-db";

// Worker pool sizes per queue class, highest priority first
pub const CRITICAL_WORKERS: usize = 8;
pub const DEFAULT_WORKERS: usize = 4;
pub const LOW_WORKERS: usize = 2;

// Attempts a ledger commit makes against cross-process version races
// before giving up
pub const MAX_COMMIT_ATTEMPTS: usize = 3;

// Bounded channel sizes; overflow drops notifications, never blocks
pub const AUDIT_CHANNEL_CAPACITY: usize = 1024;
pub const LEDGER_EVENT_CAPACITY: usize = 1024;

// Functions Helpers
fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_owned()
}

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_cancellation_window() -> u64 {
    festa_common::config::DEFAULT_CANCELLATION_WINDOW_SECS
}

fn default_signature_freshness() -> u64 {
    festa_common::config::DEFAULT_SIGNATURE_FRESHNESS_SECS
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP API bind address
    #[clap(long, default_value_t = String::from(DEFAULT_BIND_ADDRESS))]
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the sled database directory
    #[clap(long, default_value_t = String::from(DEFAULT_DB_PATH))]
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Redis URL for the task queue broker.
    /// Without it the daemon runs on the in-memory broker: fine for
    /// development, tasks do not survive a restart.
    #[clap(long)]
    pub redis_url: Option<String>,
    /// Worker count for the critical queue
    #[clap(long, default_value_t = CRITICAL_WORKERS)]
    #[serde(default)]
    pub critical_workers: usize,
    /// Worker count for the default queue
    #[clap(long, default_value_t = DEFAULT_WORKERS)]
    #[serde(default)]
    pub default_workers: usize,
    /// Worker count for the low queue
    #[clap(long, default_value_t = LOW_WORKERS)]
    #[serde(default)]
    pub low_workers: usize,
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[clap(long, default_value_t = String::from("info"))]
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Seconds during which a payment may be cancelled without an
    /// admin override
    #[clap(long, default_value_t = festa_common::config::DEFAULT_CANCELLATION_WINDOW_SECS)]
    #[serde(default = "default_cancellation_window")]
    pub cancellation_window_secs: u64,
    /// Seconds an offline transaction signature stays acceptable after
    /// its capture timestamp
    #[clap(long, default_value_t = festa_common::config::DEFAULT_SIGNATURE_FRESHNESS_SECS)]
    #[serde(default = "default_signature_freshness")]
    pub signature_freshness_secs: u64,
    /// Shared secret (32-byte hex) authenticating the payment webhook
    /// ingress
    #[clap(long)]
    pub payment_ingress_secret: Option<String>,
    /// Webhook URL receiving signed security alerts
    #[clap(long)]
    pub alert_webhook_url: Option<String>,
    /// Secret (32-byte hex) signing alert webhooks
    #[clap(long)]
    pub alert_webhook_secret: Option<String>,
    /// Chat webhook URL receiving security alerts
    #[clap(long)]
    pub alert_chat_url: Option<String>,
    /// Email recipients for security alerts
    #[clap(long)]
    pub alert_email: Vec<String>,
}

#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[clap(name = "festa_daemon", version = VERSION, about = "Festa cashless platform daemon")]
pub struct DaemonConfig {
    #[clap(flatten)]
    pub network: NetworkConfig,
    #[clap(flatten)]
    pub storage: StorageConfig,
    #[clap(flatten)]
    pub queue: QueueConfig,
    #[clap(flatten)]
    pub log: LogConfig,
    #[clap(flatten)]
    pub security: SecurityConfig,
}
