//! USD Peg Controller
//!
//! Independent "true USD" oracle for stablecoins. For each reference asset
//! (BTC, ETH) it keeps the externally observed USD price and compares it
//! with the on-chain price of the asset in each monitored stable:
//!
//! ```text
//! peg_ratio_to_usd(stable) = avg over {BTC, ETH} of onchain(asset/stable) / usd(asset)
//! ```
//!
//! A ratio above 1 means one USD buys more than one unit of the stable.
//!
//! A supervisor task checks feed liveness every interval, restarts the
//! feed when it falls silent, and re-evaluates the [`SystemGate`].
//!
//! Created: 2026-02-05
//! Modified: 2026-02-06 - Restart hysteresis, stable cross rates
//! Modified: 2026-02-07 - Silence measured from the older ticker

use super::feed::{PriceFeed, TickerUpdate};
use super::gate::SystemGate;
use super::history::{PriceHistory, PricePoint};
use super::liveness::{LivenessPolicy, LivenessVerdict};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reference assets priced against USD
pub const REFERENCE_ASSETS: [&str; 2] = ["BTC", "ETH"];

#[derive(Debug, Clone)]
pub struct PegConfig {
    /// Maximum age of any price leg used in a ratio
    pub max_staleness: chrono::Duration,
    pub liveness: LivenessPolicy,
    pub restart_delay: Duration,
    pub check_interval: Duration,
    /// Gate trips when |ratio - 1| exceeds this, in percent
    pub max_deviation_pct: f64,
    pub monitored_stables: Vec<String>,
}

impl Default for PegConfig {
    fn default() -> Self {
        Self {
            max_staleness: chrono::Duration::seconds(45),
            liveness: LivenessPolicy::default(),
            restart_delay: Duration::from_secs(5),
            check_interval: Duration::from_secs(60),
            max_deviation_pct: 2.5,
            monitored_stables: vec!["USDT".to_string(), "USDC".to_string()],
        }
    }
}

#[derive(Debug, Default)]
struct UsdReference {
    btc: Option<PricePoint>,
    eth: Option<PricePoint>,
    feed_started: Option<DateTime<Utc>>,
    last_restart: Option<DateTime<Utc>>,
}

impl UsdReference {
    fn apply(&mut self, update: &TickerUpdate, now: DateTime<Utc>) {
        let point = Some(PricePoint {
            price: update.last_price,
            observed_at: now,
        });
        match update.symbol.to_uppercase().as_str() {
            "BTC" => self.btc = point,
            "ETH" => self.eth = point,
            other => debug!("Ignoring ticker for {}", other),
        }
    }

    fn get(&self, asset: &str) -> Option<PricePoint> {
        match asset {
            "BTC" => self.btc,
            "ETH" => self.eth,
            _ => None,
        }
    }

    /// Start of the current silence: the older of the two tickers, so one
    /// dead ticker counts as a silent feed. Falls back to feed start while
    /// either ticker has never reported.
    fn silent_since(&self) -> Option<DateTime<Utc>> {
        match (self.btc, self.eth) {
            (Some(btc), Some(eth)) => Some(btc.observed_at.min(eth.observed_at)),
            _ => self.feed_started,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn elapsed(from: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - from).to_std().unwrap_or(Duration::ZERO)
}

pub struct PegController {
    config: PegConfig,
    feed: Arc<dyn PriceFeed>,
    history: Arc<dyn PriceHistory>,
    gate: SystemGate,
    reference: Arc<Mutex<UsdReference>>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl PegController {
    pub fn new(config: PegConfig, feed: Arc<dyn PriceFeed>, history: Arc<dyn PriceHistory>, gate: SystemGate) -> Self {
        Self {
            config,
            feed,
            history,
            gate,
            reference: Arc::new(Mutex::new(UsdReference::default())),
            feed_task: Mutex::new(None),
            supervisor: Mutex::new(None),
        }
    }

    pub fn gate(&self) -> &SystemGate {
        &self.gate
    }

    /// Track every reference asset against every monitored stable.
    pub fn register_pairs(&self) {
        for asset in REFERENCE_ASSETS {
            for stable in &self.config.monitored_stables {
                self.history.track_pair(asset, stable);
            }
        }
        info!(
            "Peg pairs registered: {:?} x {:?}",
            REFERENCE_ASSETS, self.config.monitored_stables
        );
    }

    /// Apply a ticker update observed at `now`.
    pub fn on_ticker(&self, update: &TickerUpdate, now: DateTime<Utc>) {
        lock(&self.reference).apply(update, now);
    }

    pub fn usd_price(&self, asset: &str) -> Option<PricePoint> {
        lock(&self.reference).get(&asset.to_uppercase())
    }

    pub fn peg_ratio_to_usd(&self, stable: &str) -> Option<f64> {
        self.peg_ratio_to_usd_at(stable, Utc::now())
    }

    /// `None` unless every leg, external and on-chain, is at most
    /// `max_staleness` old at `now`.
    pub fn peg_ratio_to_usd_at(&self, stable: &str, now: DateTime<Utc>) -> Option<f64> {
        let fresh = |p: &PricePoint| now - p.observed_at <= self.config.max_staleness;
        let mut sum = 0.0;
        for asset in REFERENCE_ASSETS {
            let usd = self.usd_price(asset)?;
            let onchain = self.history.last_price(asset, stable)?;
            if !fresh(&usd) || !fresh(&onchain) || usd.price <= 0.0 {
                return None;
            }
            sum += onchain.price / usd.price;
        }
        Some(sum / REFERENCE_ASSETS.len() as f64)
    }

    /// Units of `b` per unit of `a`, from on-chain prices only. The two
    /// observations of each asset must lie within `max_staleness` of each other.
    pub fn peg_ratio_to_other_stable(&self, a: &str, b: &str) -> Option<f64> {
        let mut sum = 0.0;
        for asset in REFERENCE_ASSETS {
            let in_a = self.history.last_price(asset, a)?;
            let in_b = self.history.last_price(asset, b)?;
            let gap = (in_a.observed_at - in_b.observed_at).abs();
            if gap > self.config.max_staleness || in_a.price <= 0.0 {
                return None;
            }
            sum += in_b.price / in_a.price;
        }
        Some(sum / REFERENCE_ASSETS.len() as f64)
    }

    /// Peg ratios of `stable` against every other monitored stable and USD.
    pub fn stable_cross_rates(&self, stable: &str) -> Vec<(String, Option<f64>)> {
        let mut rates: Vec<(String, Option<f64>)> = self
            .config
            .monitored_stables
            .iter()
            .filter(|s| !s.eq_ignore_ascii_case(stable))
            .map(|other| (other.clone(), self.peg_ratio_to_other_stable(stable, other)))
            .collect();
        rates.push(("USD".to_string(), self.peg_ratio_to_usd(stable)));
        rates
    }

    /// Trip the gate on any off-peg stable; restore it once every monitored
    /// stable has a known ratio within bounds. Returns the gate state.
    pub fn evaluate_gate(&self, now: DateTime<Utc>) -> bool {
        let mut all_known = true;
        for stable in &self.config.monitored_stables {
            match self.peg_ratio_to_usd_at(stable, now) {
                Some(ratio) if (ratio - 1.0).abs() * 100.0 > self.config.max_deviation_pct => {
                    self.gate
                        .trip(&format!("{} peg ratio {:.4} beyond {}%", stable, ratio, self.config.max_deviation_pct));
                    return false;
                }
                Some(_) => {}
                None => all_known = false,
            }
        }
        if all_known {
            self.gate.restore();
        }
        self.gate.is_active()
    }

    pub fn is_usd_tracking_active(&self) -> bool {
        lock(&self.feed_task)
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    fn start_feed(&self) {
        let feed = self.feed.clone();
        let reference = self.reference.clone();
        let symbols: Vec<String> = REFERENCE_ASSETS.iter().map(|s| s.to_string()).collect();
        lock(&self.reference).feed_started = Some(Utc::now());

        let task = tokio::spawn(async move {
            use futures::StreamExt;
            match feed.subscribe(&symbols).await {
                Ok(mut updates) => {
                    while let Some(update) = updates.next().await {
                        lock(&reference).apply(&update, Utc::now());
                    }
                    warn!("USD ticker stream ended");
                }
                Err(e) => warn!("USD ticker subscription failed: {:#}", e),
            }
        });

        if let Some(old) = lock(&self.feed_task).replace(task) {
            old.abort();
        }
    }

    fn stop_feed(&self) {
        if let Some(task) = lock(&self.feed_task).take() {
            task.abort();
        }
        lock(&self.reference).feed_started = None;
    }

    /// Start the feed and its supervisor.
    pub fn start(self: &Arc<Self>) {
        self.start_feed();

        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.check_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else { break };
                this.supervise(Utc::now()).await;
            }
        });
        if let Some(old) = lock(&self.supervisor).replace(task) {
            old.abort();
        }
        info!("💵 USD tracking started");
    }

    /// One supervision round: liveness, then the safety gate.
    pub async fn supervise(&self, now: DateTime<Utc>) -> LivenessVerdict {
        let (silence, since_restart) = {
            let reference = lock(&self.reference);
            let silence = reference
                .silent_since()
                .map(|t| elapsed(t, now))
                .unwrap_or(Duration::MAX);
            (silence, reference.last_restart.map(|t| elapsed(t, now)))
        };

        let verdict = self.config.liveness.evaluate(silence, since_restart);
        match verdict {
            LivenessVerdict::Healthy => {}
            LivenessVerdict::Degraded { silence } => {
                warn!("⚠️ USD feed silent for {:?} after a recent restart", silence);
            }
            LivenessVerdict::Restart { silence } => {
                warn!(
                    "🔁 USD feed silent for {:?}, restarting in {:?}",
                    silence, self.config.restart_delay
                );
                self.stop_feed();
                tokio::time::sleep(self.config.restart_delay).await;
                self.start_feed();
                lock(&self.reference).last_restart = Some(Utc::now());
            }
        }

        self.evaluate_gate(now);
        verdict
    }

    /// Stop supervisor and feed; the feed connection closes with its task.
    pub fn stop(&self) {
        let supervisor = lock(&self.supervisor).take();
        let was_running = supervisor.is_some();
        if let Some(task) = supervisor {
            task.abort();
        }
        self.stop_feed();
        if was_running {
            info!("USD tracking stopped");
        }
    }
}

impl Drop for PegController {
    fn drop(&mut self) {
        self.stop();
    }
}
