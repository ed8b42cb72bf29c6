//! Configuration management
//! Load settings from a .env file and the process environment

use crate::arbitrage::DetectorConfig;
use crate::peg::{LivenessPolicy, PegConfig};
use alloy::primitives::{address, Address};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Uniswap V3 factory on Ethereum mainnet
pub const MAINNET_V3_FACTORY: Address = address!("1F98431c8aD98523631AE4a59f267346ea31F984");
/// Tether USD on Ethereum mainnet
pub const MAINNET_USDT: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub rpc_ws_url: String,
    pub factory: Address,
    pub reference_stable: Address,
    pub universe_file: PathBuf,
    pub state_dir: PathBuf,
    pub opportunity_dir: PathBuf,

    pub min_profit_usd: f64,
    pub max_cycle_len: usize,

    pub pool_retry_days: i64,
    pub min_pool_liquidity_usd: f64,
    pub one_sided_liquidity_factor: f64,
    pub liquidity_sweep_secs: u64,
    pub refresh_interval_secs: u64,
    pub rpc_concurrency: usize,
    pub rpc_log_interval_secs: u64,
    pub startup_block_timeout_secs: u64,
    pub universe_poll_secs: u64,

    pub enable_usd_tracking: bool,
    pub price_feed_url: String,
    pub peg_max_staleness_secs: i64,
    pub peg_feed_restart_secs: u64,
    pub peg_feed_warn_ceiling_secs: u64,
    pub peg_feed_restart_delay_secs: u64,
    pub peg_liveness_check_secs: u64,
    pub peg_max_deviation_pct: f64,
    pub monitored_stables: Vec<String>,
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

fn parse_bool_or(key: &str, default: bool) -> Result<bool> {
    match var(key) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("{} has invalid boolean '{}'", key, raw),
        },
        None => Ok(default),
    }
}

/// Read `env_file` (if it exists) into the process environment, then build
/// the config. Variables already set in the environment take precedence.
pub fn load_config<P: AsRef<Path>>(env_file: P) -> Result<MonitorConfig> {
    let env_file = env_file.as_ref();
    if env_file.exists() {
        dotenv::from_path(env_file).with_context(|| format!("Failed to read {}", env_file.display()))?;
    }
    MonitorConfig::from_env()
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self> {
        let monitored_stables = var("MONITORED_STABLES")
            .unwrap_or_else(|| "USDT,USDC".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            rpc_ws_url: var("RPC_WS_URL").context("RPC_WS_URL not set")?,
            factory: parse_or("UNISWAP_V3_FACTORY", MAINNET_V3_FACTORY)?,
            reference_stable: parse_or("REFERENCE_STABLE", MAINNET_USDT)?,
            universe_file: parse_or("UNIVERSE_FILE", PathBuf::from("config/tokens.json"))?,
            state_dir: parse_or("STATE_DIR", PathBuf::from("data/state"))?,
            opportunity_dir: parse_or("OPPORTUNITY_DIR", PathBuf::from("data/opportunities"))?,

            min_profit_usd: parse_or("MIN_PROFIT_USD", 5.0)?,
            max_cycle_len: parse_or("MAX_CYCLE_LEN", 4)?,

            pool_retry_days: parse_or("POOL_RETRY_DAYS", 30)?,
            min_pool_liquidity_usd: parse_or("MIN_POOL_LIQUIDITY_USD", 70_000.0)?,
            one_sided_liquidity_factor: parse_or("ONE_SIDED_LIQUIDITY_FACTOR", 0.45)?,
            liquidity_sweep_secs: parse_or("LIQUIDITY_SWEEP_SECS", 3600)?,
            refresh_interval_secs: parse_or("REFRESH_INTERVAL_SECS", 600)?,
            rpc_concurrency: parse_or("RPC_CONCURRENCY", 16)?,
            rpc_log_interval_secs: parse_or("RPC_LOG_INTERVAL_SECS", 1800)?,
            startup_block_timeout_secs: parse_or("STARTUP_BLOCK_TIMEOUT_SECS", 60)?,
            universe_poll_secs: parse_or("UNIVERSE_POLL_SECS", 5)?,

            enable_usd_tracking: parse_bool_or("ENABLE_USD_TRACKING", true)?,
            price_feed_url: var("PRICE_FEED_URL").unwrap_or_else(|| crate::peg::feed::COINBASE_WS_URL.to_string()),
            peg_max_staleness_secs: parse_or("PEG_MAX_STALENESS_SECS", 45)?,
            peg_feed_restart_secs: parse_or("PEG_FEED_RESTART_SECS", 90)?,
            peg_feed_warn_ceiling_secs: parse_or("PEG_FEED_WARN_CEILING_SECS", 120)?,
            peg_feed_restart_delay_secs: parse_or("PEG_FEED_RESTART_DELAY_SECS", 5)?,
            peg_liveness_check_secs: parse_or("PEG_LIVENESS_CHECK_SECS", 60)?,
            peg_max_deviation_pct: parse_or("PEG_MAX_DEVIATION_PCT", 2.5)?,
            monitored_stables,
        })
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            min_profit_usd: self.min_profit_usd,
            max_cycle_len: self.max_cycle_len,
        }
    }

    pub fn peg_config(&self) -> PegConfig {
        PegConfig {
            max_staleness: chrono::Duration::seconds(self.peg_max_staleness_secs),
            liveness: LivenessPolicy {
                restart_after: Duration::from_secs(self.peg_feed_restart_secs),
                warn_ceiling: Duration::from_secs(self.peg_feed_warn_ceiling_secs),
            },
            restart_delay: Duration::from_secs(self.peg_feed_restart_delay_secs),
            check_interval: Duration::from_secs(self.peg_liveness_check_secs.max(1)),
            max_deviation_pct: self.peg_max_deviation_pct,
            monitored_stables: self.monitored_stables.clone(),
        }
    }

    pub fn pool_retry_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.pool_retry_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // process environment is global; serialize the tests touching it
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 5] = ["RPC_WS_URL", "MIN_PROFIT_USD", "MONITORED_STABLES", "ENABLE_USD_TRACKING", "MAX_CYCLE_LEN"];

    fn clear() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear();
        std::env::set_var("RPC_WS_URL", "ws://localhost:8546");

        let config = MonitorConfig::from_env().unwrap();
        assert_eq!(config.factory, MAINNET_V3_FACTORY);
        assert_eq!(config.reference_stable, MAINNET_USDT);
        assert_eq!(config.min_profit_usd, 5.0);
        assert_eq!(config.monitored_stables, vec!["USDT", "USDC"]);
        assert!(config.enable_usd_tracking);

        let peg = config.peg_config();
        assert_eq!(peg.max_staleness, chrono::Duration::seconds(45));
        assert_eq!(peg.liveness.restart_after, Duration::from_secs(90));
        assert_eq!(config.detector_config().max_cycle_len, 4);
        clear();
    }

    #[test]
    fn test_overrides_and_errors() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear();
        assert!(MonitorConfig::from_env().is_err());

        std::env::set_var("RPC_WS_URL", "ws://localhost:8546");
        std::env::set_var("MIN_PROFIT_USD", "12.5");
        std::env::set_var("MONITORED_STABLES", "usdt, dai ,");
        std::env::set_var("ENABLE_USD_TRACKING", "false");
        let config = MonitorConfig::from_env().unwrap();
        assert_eq!(config.min_profit_usd, 12.5);
        assert_eq!(config.monitored_stables, vec!["USDT", "DAI"]);
        assert!(!config.enable_usd_tracking);

        std::env::set_var("MAX_CYCLE_LEN", "four");
        assert!(MonitorConfig::from_env().is_err());
        clear();
    }
}
