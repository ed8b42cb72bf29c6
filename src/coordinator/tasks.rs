//! Background maintenance tasks
//!
//! Each task is a plain tokio loop over an interval, spawned by the
//! coordinator and aborted on shutdown.
//!
//! Created: 2026-02-06

use super::sweep::{sweep_low_liquidity, LiquidityFloor};
use crate::chain::RpcMeter;
use crate::peg::SystemGate;
use crate::pool::PoolRegistry;
use crate::token::TokenRegistry;
use chrono::{DateTime, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Time left until the next UTC midnight.
pub fn until_next_midnight(now: DateTime<Utc>) -> Duration {
    let next = now
        .date_naive()
        .succ_opt()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc());
    match next {
        Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
        None => Duration::from_secs(24 * 3600),
    }
}

/// Reset the RPC counter at every UTC midnight.
pub fn spawn_meter_reset(meter: Arc<RpcMeter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(until_next_midnight(Utc::now())).await;
            let previous = meter.reset(Utc::now());
            info!("📊 RPC counter reset at midnight UTC ({} calls in the last period)", previous);
        }
    })
}

pub fn spawn_meter_log(meter: Arc<RpcMeter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            meter.log_throughput(Utc::now());
        }
    })
}

pub fn spawn_liquidity_sweep(pools: PoolRegistry, gate: SystemGate, floor: LiquidityFloor, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            sweep_low_liquidity(&pools, &gate, floor).await;
        }
    })
}

/// Periodic re-read of every active token and pool, correcting state a
/// missed event left stale.
pub fn spawn_reconciliation(tokens: TokenRegistry, pools: PoolRegistry, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let (t, p) = tokio::join!(tokens.refresh_all(), pools.refresh_all());
            info!("🔄 Reconciliation: {} tokens, {} pools refreshed", t, p);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_until_next_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 2, 6, 23, 59, 30).unwrap();
        assert_eq!(until_next_midnight(now), Duration::from_secs(30));

        let now = Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap();
        assert_eq!(until_next_midnight(now), Duration::from_secs(24 * 3600));
    }

    #[tokio::test]
    async fn test_meter_log_task_aborts() {
        let task = spawn_meter_log(Arc::new(RpcMeter::new()), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
