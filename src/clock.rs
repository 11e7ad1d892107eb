use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// How long `just_refreshed` stays raised after a broadcast.
pub const JUST_REFRESHED_WINDOW: Duration = Duration::from_secs(2);

/// Timing signal only; subscribers fetch their own data.
#[derive(Clone, Copy, Debug)]
pub struct RefreshTick {
    pub seq: u64,
    pub at: DateTime<Utc>,
}

struct ClockState {
    period_secs: AtomicU64,
    countdown: AtomicU64,
    just_refreshed: AtomicBool,
    ticks: broadcast::Sender<RefreshTick>,
}

impl ClockState {
    fn reset(&self) {
        self.countdown
            .store(self.period_secs.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}

/// Process-wide countdown that every polling consumer synchronises to.
/// Built once at startup and shared by reference.
pub struct SharedRefreshClock {
    state: Arc<ClockState>,
    _handle: JoinHandle<()>,
}

impl SharedRefreshClock {
    pub fn start(period: Duration) -> Self {
        let period_secs = period.as_secs().max(1);
        let (ticks, _) = broadcast::channel(16);
        let state = Arc::new(ClockState {
            period_secs: AtomicU64::new(period_secs),
            countdown: AtomicU64::new(period_secs),
            just_refreshed: AtomicBool::new(false),
            ticks,
        });

        let handle = tokio::spawn(run(state.clone()));
        Self {
            state,
            _handle: handle,
        }
    }

    pub fn countdown(&self) -> u64 {
        self.state.countdown.load(Ordering::SeqCst)
    }

    pub fn just_refreshed(&self) -> bool {
        self.state.just_refreshed.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshTick> {
        self.state.ticks.subscribe()
    }

    pub fn reset_countdown(&self) {
        self.state.reset();
    }

    /// Applied the next time the countdown resets.
    pub fn set_period(&self, period: Duration) {
        self.state
            .period_secs
            .store(period.as_secs().max(1), Ordering::SeqCst);
    }
}

async fn run(state: Arc<ClockState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    interval.tick().await;

    let mut seq = 0;
    loop {
        interval.tick().await;

        let remaining = state.countdown.load(Ordering::SeqCst).saturating_sub(1);
        state.countdown.store(remaining, Ordering::SeqCst);
        if remaining > 0 {
            continue;
        }

        seq += 1;
        debug!(seq, "Refresh clock fired");
        let _ = state.ticks.send(RefreshTick { seq, at: Utc::now() });

        state.just_refreshed.store(true, Ordering::SeqCst);
        tokio::time::sleep(JUST_REFRESHED_WINDOW).await;
        state.just_refreshed.store(false, Ordering::SeqCst);

        state.reset();
        interval.reset();
    }
}
