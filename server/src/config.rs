use std::time::Duration;

use clap::{parser::ValueSource, CommandFactory, FromArgMatches, Parser, ValueEnum};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};

/// Sector chat server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "sectorchat-server", version, about = "Sector chat server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "SECTORCHAT_PORT", default_value = "3000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "SECTORCHAT_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./sectorchat.toml")]
    pub config: String,

    /// Enable structured JSON logging
    #[arg(long, env = "SECTORCHAT_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for messages.json and users.json
    #[arg(long, env = "SECTORCHAT_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// When a sent message is written to disk relative to its acknowledgement
    #[arg(long, env = "SECTORCHAT_DURABILITY", value_enum, default_value = "async")]
    pub durability: Durability,

    /// Emails that are granted admin rights on registration (comma separated)
    #[arg(long, env = "SECTORCHAT_ADMIN_EMAILS", value_delimiter = ',')]
    #[serde(default, deserialize_with = "comma_list")]
    pub admin_emails: Vec<String>,

    /// Message retention (loaded from [retention] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub retention: Option<RetentionConfig>,

    /// Admission control (loaded from [rate_limit] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// Persistence policy for sent messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Broadcast and acknowledge first; the write happens in the background.
    /// A crash between append and write may lose the latest messages.
    Async,
    /// Write the whole store before acknowledging the sender.
    Sync,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Maximum message age in hours (default: 24)
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,

    /// Interval in seconds between cleanup passes (default: 3600 = 1 hour)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            cleanup_interval_secs: 3600,
        }
    }
}

impl RetentionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_cleanup_interval() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Messages a connection may send inside one window (default: 7)
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Sliding window length in seconds (default: 10)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Seconds per replenished token on /api/register and /api/login, per IP
    #[serde(default = "default_auth_per_second")]
    pub auth_per_second: u64,

    /// Burst allowance on /api/register and /api/login, per IP
    #[serde(default = "default_auth_burst")]
    pub auth_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: 7,
            window_secs: 10,
            auth_per_second: 6,
            auth_burst: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_max_messages() -> usize {
    7
}

fn default_window_secs() -> u64 {
    10
}

fn default_auth_per_second() -> u64 {
    6
}

fn default_auth_burst() -> u32 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            config: "./sectorchat.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            durability: Durability::Async,
            admin_emails: Vec::new(),
            retention: None,
            rate_limit: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (SECTORCHAT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let matches = Config::command().get_matches();
        let cli = Config::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

        // Only flags actually typed on the command line outrank TOML and env;
        // clap's own defaults would otherwise shadow both.
        let arg_ids: Vec<String> = Config::command()
            .get_arguments()
            .map(|arg| arg.get_id().to_string())
            .collect();
        let mut explicit = serde_json::Map::new();
        if let serde_json::Value::Object(fields) =
            serde_json::to_value(&cli).map_err(|e| figment::Error::from(e.to_string()))?
        {
            for (key, value) in fields {
                if arg_ids.contains(&key)
                    && matches.value_source(&key) == Some(ValueSource::CommandLine)
                {
                    explicit.insert(key, value);
                }
            }
        }

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("SECTORCHAT_"))
            .merge(Serialized::defaults(explicit))
            .extract()
    }

    pub fn retention(&self) -> RetentionConfig {
        self.retention.clone().unwrap_or_default()
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        self.rate_limit.clone().unwrap_or_default()
    }
}

/// Accepts either a list or a comma separated string (as env vars provide).
fn comma_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        Single(String),
    }

    let items = match ListOrString::deserialize(deserializer)? {
        ListOrString::List(items) => items,
        ListOrString::Single(joined) => joined.split(',').map(str::to_string).collect(),
    };
    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Sector chat server configuration
# Place this file at ./sectorchat.toml or specify with --config <path>
# All settings can be overridden via environment variables (SECTORCHAT_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3000)
# port = 3000

# Bind address (default: 0.0.0.0)
# bind_address = "0.0.0.0"

# Enable structured JSON logging
# json_logs = false

# Data directory for messages.json and users.json
# data_dir = "./data"

# Durability of sent messages: "async" (write after broadcast, best effort)
# or "sync" (write before the sender is acknowledged)
# durability = "async"

# Registrations with these emails become admins
# admin_emails = ["ops@example.com"]

# ---- Retention ----
# [retention]
# ttl_hours = 24                 # messages older than this are evicted
# cleanup_interval_secs = 3600   # periodic eviction pass

# ---- Admission control ----
# [rate_limit]
# max_messages = 7               # per connection...
# window_secs = 10               # ...in any trailing window of this length
# auth_per_second = 6            # register/login token refill period per IP
# auth_burst = 10                # register/login burst per IP
"#
    .to_string()
}
