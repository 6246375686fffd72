use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub binance: BinanceConfig,
    #[serde(default)]
    pub kucoin: KucoinConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub fees: FeesConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://perp_pilot.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_binance_api_url")]
    pub api_url: String,
    #[serde(default = "default_binance_stream_url")]
    pub stream_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

fn default_binance_api_url() -> String {
    "https://fapi.binance.com".to_string()
}
fn default_binance_stream_url() -> String {
    "wss://fstream.binance.com".to_string()
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: default_binance_api_url(),
            stream_url: default_binance_stream_url(),
            api_key: String::new(),
            api_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KucoinConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_kucoin_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub api_passphrase: String,
}

fn default_kucoin_api_url() -> String {
    "https://api-futures.kucoin.com".to_string()
}

impl Default for KucoinConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_kucoin_api_url(),
            api_key: String::new(),
            api_secret: String::new(),
            api_passphrase: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Quote-currency notional per trade.
    #[serde(default = "default_trade_amount")]
    pub trade_amount: f64,
    #[serde(default = "default_min_trade_amount")]
    pub min_trade_amount: f64,
    #[serde(default = "default_max_trade_amount")]
    pub max_trade_amount: f64,
    /// Default leverage applied to a symbol before placement.
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// LIMIT price-proximity gate, as a fraction (0.02 = 2%).
    #[serde(default = "default_price_threshold")]
    pub price_threshold: f64,
    /// MARKET orders have their own distance policy.
    #[serde(default = "default_market_price_threshold")]
    pub market_price_threshold: f64,
    /// Wider proximity override for the listed memecoin symbols.
    #[serde(default = "default_memecoin_price_threshold")]
    pub memecoin_price_threshold: f64,
    #[serde(default)]
    pub memecoin_symbols: Vec<String>,
    /// Seconds a symbol is blocked after any attempt.
    #[serde(default = "default_trade_cooldown")]
    pub trade_cooldown_secs: u64,
    /// Extended cooldown when a position already exists on the symbol.
    #[serde(default = "default_position_cooldown")]
    pub position_cooldown_secs: u64,
    /// Optional per-trader cooldown; zero disables it.
    #[serde(default)]
    pub trader_cooldown_secs: u64,
    /// Open trades allowed per symbol before MERGE stops being offered.
    #[serde(default = "default_max_position_trades")]
    pub max_position_trades: u32,
}

fn default_trade_amount() -> f64 {
    101.0
}
fn default_min_trade_amount() -> f64 {
    10.0
}
fn default_max_trade_amount() -> f64 {
    1000.0
}
fn default_leverage() -> u32 {
    1
}
fn default_price_threshold() -> f64 {
    0.02
}
fn default_market_price_threshold() -> f64 {
    0.02
}
fn default_memecoin_price_threshold() -> f64 {
    0.05
}
fn default_trade_cooldown() -> u64 {
    300
}
fn default_position_cooldown() -> u64 {
    600
}
fn default_max_position_trades() -> u32 {
    2
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            trade_amount: default_trade_amount(),
            min_trade_amount: default_min_trade_amount(),
            max_trade_amount: default_max_trade_amount(),
            leverage: default_leverage(),
            price_threshold: default_price_threshold(),
            market_price_threshold: default_market_price_threshold(),
            memecoin_price_threshold: default_memecoin_price_threshold(),
            memecoin_symbols: Vec::new(),
            trade_cooldown_secs: default_trade_cooldown(),
            position_cooldown_secs: default_position_cooldown(),
            trader_cooldown_secs: 0,
            max_position_trades: default_max_position_trades(),
        }
    }
}

impl TradingConfig {
    /// The proximity threshold for a symbol and order kind.
    pub fn proximity_threshold(&self, coin_symbol: &str, is_market: bool) -> f64 {
        if self
            .memecoin_symbols
            .iter()
            .any(|s| s.eq_ignore_ascii_case(coin_symbol))
        {
            return self.memecoin_price_threshold;
        }
        if is_market {
            self.market_price_threshold
        } else {
            self.price_threshold
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeesConfig {
    /// Select the fixed single-rate calculator instead of maker/taker
    /// tiers. The active mode is decided here and nowhere else.
    #[serde(default = "default_use_fixed")]
    pub use_fixed_calculator: bool,
    /// 0.0002 (2 bps) or 0.0005 (5 bps).
    #[serde(default = "default_fixed_rate")]
    pub fixed_fee_rate: f64,
    #[serde(default = "default_maker_rate")]
    pub maker_rate: f64,
    #[serde(default = "default_taker_rate")]
    pub taker_rate: f64,
    #[serde(default)]
    pub bnb_discount: bool,
}

fn default_use_fixed() -> bool {
    true
}
fn default_fixed_rate() -> f64 {
    0.0002
}
fn default_maker_rate() -> f64 {
    0.0002
}
fn default_taker_rate() -> f64 {
    0.0005
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            use_fixed_calculator: default_use_fixed(),
            fixed_fee_rate: default_fixed_rate(),
            maker_rate: default_maker_rate(),
            taker_rate: default_taker_rate(),
            bnb_discount: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Listen keys are refreshed on this cadence.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    /// Venue-enforced maximum connection lifetime.
    #[serde(default = "default_rotate_after")]
    pub rotate_after_secs: u64,
    /// Pending row updates above this mark pause socket reads.
    #[serde(default = "default_high_water_mark")]
    pub queue_high_water_mark: usize,
}

fn default_ping_interval() -> u64 {
    180
}
fn default_pong_timeout() -> u64 {
    600
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_keepalive_interval() -> u64 {
    1800
}
fn default_rotate_after() -> u64 {
    24 * 3600
}
fn default_high_water_mark() -> usize {
    512
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            keepalive_interval_secs: default_keepalive_interval(),
            rotate_after_secs: default_rotate_after(),
            queue_high_water_mark: default_high_water_mark(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_status_sync_interval")]
    pub status_sync_interval_secs: u64,
    #[serde(default = "default_pnl_backfill_interval")]
    pub pnl_backfill_interval_secs: u64,
    #[serde(default = "default_orphan_cleanup_interval")]
    pub orphan_cleanup_interval_secs: u64,
    #[serde(default = "default_balance_sync_interval")]
    pub balance_sync_interval_secs: u64,
    #[serde(default = "default_audit_interval")]
    pub audit_interval_secs: u64,
    /// Status sync ignores live trades older than this.
    #[serde(default = "default_status_sync_max_age")]
    pub status_sync_max_age_hours: u64,
    /// Audit confidence below this marks the venue position unmatched.
    #[serde(default = "default_audit_confidence")]
    pub audit_confidence_threshold: f64,
    /// When set, fully unmatched venue positions get a synthetic row.
    #[serde(default)]
    pub audit_create_synthetic: bool,
}

fn default_status_sync_interval() -> u64 {
    24 * 60
}
fn default_pnl_backfill_interval() -> u64 {
    3600
}
fn default_orphan_cleanup_interval() -> u64 {
    2 * 3600
}
fn default_balance_sync_interval() -> u64 {
    300
}
fn default_audit_interval() -> u64 {
    300
}
fn default_status_sync_max_age() -> u64 {
    120
}
fn default_audit_confidence() -> f64 {
    0.8
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            status_sync_interval_secs: default_status_sync_interval(),
            pnl_backfill_interval_secs: default_pnl_backfill_interval(),
            orphan_cleanup_interval_secs: default_orphan_cleanup_interval(),
            balance_sync_interval_secs: default_balance_sync_interval(),
            audit_interval_secs: default_audit_interval(),
            status_sync_max_age_hours: default_status_sync_max_age(),
            audit_confidence_threshold: default_audit_confidence(),
            audit_create_synthetic: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable file logging
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,
    /// Directory for log files (relative to executable or absolute path)
    #[serde(default = "default_log_directory")]
    pub directory: String,
    /// Prefix for log file names
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
    /// Rotation strategy: "daily", "hourly", or "never"
    #[serde(default = "default_log_rotation")]
    pub rotation: String,
}

fn default_logging_enabled() -> bool {
    true
}
fn default_log_directory() -> String {
    "logs".to_string()
}
fn default_log_file_prefix() -> String {
    "perp-pilot-server".to_string()
}
fn default_log_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            directory: default_log_directory(),
            file_prefix: default_log_file_prefix(),
            rotation: default_log_rotation(),
        }
    }
}

impl Config {
    /// Load config from layered TOML files
    ///
    /// Loads configuration files in the following order (later files override earlier):
    /// 1. {base_name}.toml (required, e.g., config.toml)
    /// 2. {base_name}.{ENV}.toml (optional, only if CONFIG_ENV is set)
    /// 3. {base_name}.local.toml (optional, for personal overrides, git-ignored)
    pub fn from_file<P: AsRef<Path>>(base_name: P) -> Result<Self> {
        let base_path = base_name.as_ref();
        let base_str = base_path.to_str().context("Invalid base path")?;

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(base_str));

        if let Ok(env) = std::env::var("CONFIG_ENV") {
            let env_config = format!("{}.{}", base_str, env);
            builder = builder.add_source(config::File::with_name(&env_config).required(false));
        }

        let local_config = format!("{}.local", base_str);
        builder = builder.add_source(config::File::with_name(&local_config).required(false));

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Get server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// A venue must be configured before the engine can start.
    pub fn validate(&self) -> Result<()> {
        if !self.binance.enabled && !self.kucoin.enabled {
            anyhow::bail!("no venue enabled: set [binance] or [kucoin] enabled = true");
        }
        if self.binance.enabled && (self.binance.api_key.is_empty() || self.binance.api_secret.is_empty()) {
            anyhow::bail!("binance enabled but api_key/api_secret missing");
        }
        if self.kucoin.enabled
            && (self.kucoin.api_key.is_empty()
                || self.kucoin.api_secret.is_empty()
                || self.kucoin.api_passphrase.is_empty())
        {
            anyhow::bail!("kucoin enabled but api credentials missing");
        }
        if self.trading.trade_amount < self.trading.min_trade_amount
            || self.trading.trade_amount > self.trading.max_trade_amount
        {
            anyhow::bail!(
                "trade_amount {} outside [{}, {}]",
                self.trading.trade_amount,
                self.trading.min_trade_amount,
                self.trading.max_trade_amount
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.trading.trade_amount, 101.0);
        assert_eq!(config.trading.leverage, 1);
        assert_eq!(config.trading.trade_cooldown_secs, 300);
        assert_eq!(config.trading.position_cooldown_secs, 600);
        assert_eq!(config.stream.ping_interval_secs, 180);
        assert_eq!(config.stream.pong_timeout_secs, 600);
        assert_eq!(config.stream.max_reconnect_attempts, 10);
        assert!(config.fees.use_fixed_calculator);
        assert_eq!(config.fees.fixed_fee_rate, 0.0002);
    }

    #[test]
    fn test_server_address() {
        let config = Config::default();
        assert_eq!(config.server_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[server]
host = "127.0.0.1"
port = 9000

[database]
url = "sqlite://custom.db"

[binance]
enabled = true
api_key = "k"
api_secret = "s"

[trading]
trade_amount = 250.0
price_threshold = 0.03
memecoin_symbols = ["PEPE", "WIF"]

[fees]
use_fixed_calculator = false
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.url, "sqlite://custom.db");
        assert_eq!(config.trading.trade_amount, 250.0);
        assert_eq!(config.trading.price_threshold, 0.03);
        assert!(!config.fees.use_fixed_calculator);
        // Unlisted sections fall back to defaults.
        assert_eq!(config.scheduler.balance_sync_interval_secs, 300);
    }

    #[test]
    fn test_proximity_threshold_overrides() {
        let mut config = Config::default();
        config.trading.memecoin_symbols = vec!["PEPE".to_string()];
        assert_eq!(config.trading.proximity_threshold("ETH", false), 0.02);
        assert_eq!(config.trading.proximity_threshold("pepe", false), 0.05);
        assert_eq!(config.trading.proximity_threshold("PEPE", true), 0.05);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.binance.enabled = true;
        assert!(config.validate().is_err());

        config.binance.api_key = "k".into();
        config.binance.api_secret = "s".into();
        assert!(config.validate().is_ok());

        config.trading.trade_amount = 5000.0;
        assert!(config.validate().is_err());
    }
}
