//! Heartbeat watchdog and the periodic supervision tick.
//!
//! The watchdog tracks stream liveness: when the master stays silent past
//! twice its advertised heartbeat interval, the event loop tears the
//! connection down and resubscribes. The supervision tick pings the
//! registry, flips degraded mode, replays buffered updates after recovery
//! and settles the revive/suppress latches.

use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::Ctx;
use crate::{demand, lifecycle};

pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: f64 = 15.0;

pub struct Watchdog {
    last_event: Mutex<Instant>,
    interval: Mutex<Duration>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            last_event: Mutex::new(Instant::now()),
            interval: Mutex::new(Duration::from_secs_f64(
                DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
            )),
        }
    }

    /// Record that the stream produced something.
    pub fn poke(&self) {
        *self.last_event.lock() = Instant::now();
    }

    /// Adopt the interval the master advertised on SUBSCRIBED.
    pub fn set_interval(&self, seconds: f64) {
        if seconds > 0.0 {
            *self.interval.lock() = Duration::from_secs_f64(seconds);
        }
    }

    /// The instant after which the subscription counts as dead.
    pub fn deadline(&self) -> Instant {
        *self.last_event.lock() + *self.interval.lock() * 2
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run_timer(ctx: Ctx, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(Duration::from_secs(ctx.config.demand_tick_seconds));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => supervise(&ctx).await,
        }
    }
}

async fn supervise(ctx: &Ctx) {
    match ctx.registry.ping().await {
        Ok(()) => {
            if ctx.degraded.swap(false, Ordering::SeqCst) {
                eprintln!("✅ registry recovered; leaving degraded mode");
                replay_buffered(ctx).await;
            }
            if let Err(e) = demand::tick(ctx).await {
                tracing::warn!(error = format!("{e:#}"), "demand tick failed");
            }
        }
        Err(e) => {
            if !ctx.degraded.swap(true, Ordering::SeqCst) {
                eprintln!("🛑 registry unavailable, entering degraded mode: {e:#}");
            }
        }
    }
}

/// Drain updates buffered while the registry was down, oldest first, so
/// per-task ordering survives the outage.
async fn replay_buffered(ctx: &Ctx) {
    loop {
        let Some(update) = ctx.buffered_updates.lock().pop_front() else {
            break;
        };
        lifecycle::handle_update(ctx.clone(), update).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn watchdog_deadline_tracks_pokes_and_interval() {
        let watchdog = Watchdog::new();
        watchdog.set_interval(5.0);
        let before = Instant::now();
        watchdog.poke();
        let deadline = watchdog.deadline();
        assert_eq!(deadline - before, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(4)).await;
        watchdog.poke();
        assert_eq!(watchdog.deadline() - Instant::now(), Duration::from_secs(10));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let watchdog = Watchdog::new();
        watchdog.set_interval(0.0);
        let deadline = watchdog.deadline();
        assert!(deadline > Instant::now());
    }
}
