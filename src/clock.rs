//! Drift-corrected elapsed-time tracking for a live match.
//!
//! The clock advances from a monotonic time source while running and is
//! periodically checkpointed to the meta table, so a reload or app
//! suspension resumes at the right elapsed time: a checkpoint written while
//! running is corrected by the wall-clock time that passed since its anchor.

use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use tokio::{sync::watch, time::interval};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    model::epoch_ms,
    store::{LocalStore, StoreResult, keys},
};

/// Status of the match clock. `Stopped` both starts and ends a session;
/// re-entering `Running` from `Stopped` continues from the current elapsed
/// value (zero for a fresh clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockStatus {
    /// Not ticking; entered on creation and when the match ends.
    Stopped,
    /// Ticking; elapsed time accrues.
    Running,
    /// Ticking halted with elapsed time frozen.
    Paused,
}

/// Meta-table record from which a clock is reconstructed after a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockCheckpoint {
    /// Status at the time the checkpoint was written.
    pub status: ClockStatus,
    /// Elapsed milliseconds at the time the checkpoint was written.
    pub elapsed_ms: i64,
    /// Wall-clock epoch milliseconds when the checkpoint was written.
    pub anchor: i64,
}

/// Result of advancing the clock by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTick {
    /// Elapsed milliseconds after the tick.
    pub elapsed_ms: i64,
    /// True when this tick reached the match duration and stopped the clock.
    pub finished: bool,
}

/// Elapsed-time tracker for one match. Pure over [`Instant`] samples; the
/// async driver in [`run_clock`] supplies them and persists checkpoints.
#[derive(Debug, Clone)]
pub struct MatchClock {
    status: ClockStatus,
    elapsed_ms: i64,
    duration_ms: i64,
    last_tick: Option<Instant>,
}

impl MatchClock {
    /// Fresh stopped clock for a match of `duration_ms` milliseconds.
    pub fn new(duration_ms: i64) -> Self {
        Self {
            status: ClockStatus::Stopped,
            elapsed_ms: 0,
            duration_ms,
            last_tick: None,
        }
    }

    /// Reconstruct a clock from a checkpoint, compensating for the time the
    /// process was not executing: a `running` checkpoint gains
    /// `now_epoch_ms - anchor` before clamping to the duration.
    pub fn restore(checkpoint: &ClockCheckpoint, duration_ms: i64, now_epoch_ms: i64) -> Self {
        let drift = match checkpoint.status {
            ClockStatus::Running => (now_epoch_ms - checkpoint.anchor).max(0),
            ClockStatus::Stopped | ClockStatus::Paused => 0,
        };
        let elapsed_ms = (checkpoint.elapsed_ms + drift).min(duration_ms);
        let status = if elapsed_ms >= duration_ms && checkpoint.status == ClockStatus::Running {
            ClockStatus::Stopped
        } else {
            checkpoint.status
        };

        Self {
            status,
            elapsed_ms,
            duration_ms,
            last_tick: None,
        }
    }

    /// Current status.
    pub fn status(&self) -> ClockStatus {
        self.status
    }

    /// Elapsed milliseconds.
    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed_ms
    }

    /// Match duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    /// Begin ticking. A no-op unless stopped or paused.
    pub fn start(&mut self, now: Instant) {
        if self.status != ClockStatus::Running {
            self.status = ClockStatus::Running;
            self.last_tick = Some(now);
        }
    }

    /// Freeze the elapsed value. A no-op unless running.
    pub fn pause(&mut self, now: Instant) {
        if self.status == ClockStatus::Running {
            self.advance(now);
            self.status = ClockStatus::Paused;
            self.last_tick = None;
        }
    }

    /// Halt ticking and cap the elapsed value to the match duration.
    pub fn stop(&mut self, now: Instant) {
        if self.status == ClockStatus::Running {
            self.advance(now);
        }
        self.status = ClockStatus::Stopped;
        self.elapsed_ms = self.elapsed_ms.min(self.duration_ms);
        self.last_tick = None;
    }

    /// Advance by the delta since the previous tick sample. The first tick
    /// after a start or restore only anchors the sample. Auto-stops when the
    /// duration is reached.
    pub fn tick(&mut self, now: Instant) -> ClockTick {
        if self.status == ClockStatus::Running {
            self.advance(now);
            if self.elapsed_ms >= self.duration_ms {
                self.status = ClockStatus::Stopped;
                self.last_tick = None;
                return ClockTick {
                    elapsed_ms: self.elapsed_ms,
                    finished: true,
                };
            }
        }
        ClockTick {
            elapsed_ms: self.elapsed_ms,
            finished: false,
        }
    }

    /// Snapshot the clock into a checkpoint anchored at the current wall
    /// clock.
    pub fn checkpoint(&self) -> ClockCheckpoint {
        ClockCheckpoint {
            status: self.status,
            elapsed_ms: self.elapsed_ms,
            anchor: epoch_ms(),
        }
    }

    fn advance(&mut self, now: Instant) {
        let delta = match self.last_tick {
            Some(previous) => now.saturating_duration_since(previous).as_millis() as i64,
            None => 0,
        };
        self.last_tick = Some(now);
        self.elapsed_ms = (self.elapsed_ms + delta).min(self.duration_ms);
    }
}

/// Load the clock for `match_id` from its checkpoint, falling back to a
/// fresh stopped clock when none exists.
pub async fn load_clock(
    store: &LocalStore,
    match_id: Uuid,
    duration_ms: i64,
) -> StoreResult<MatchClock> {
    let checkpoint: Option<ClockCheckpoint> =
        store.get_meta(&keys::clock_checkpoint(match_id)).await?;

    Ok(match checkpoint {
        Some(checkpoint) => {
            debug!(%match_id, elapsed_ms = checkpoint.elapsed_ms, "restoring clock from checkpoint");
            MatchClock::restore(&checkpoint, duration_ms, epoch_ms())
        }
        None => MatchClock::new(duration_ms),
    })
}

/// Durably checkpoint the clock for `match_id`.
pub async fn save_checkpoint(
    store: &LocalStore,
    match_id: Uuid,
    clock: &MatchClock,
) -> StoreResult<()> {
    store
        .set_meta(&keys::clock_checkpoint(match_id), &clock.checkpoint())
        .await
}

/// Store-backed controller for a shared clock.
///
/// Every status change goes through here and writes a checkpoint in the same
/// call, before the clock guard is released. A crash right after a pause or
/// stop therefore restores with the frozen status instead of a stale
/// `running` record that would gain the whole wall-clock gap.
pub struct ClockHandle {
    store: Arc<LocalStore>,
    match_id: Uuid,
    clock: Arc<tokio::sync::Mutex<MatchClock>>,
}

impl ClockHandle {
    /// Bind `clock` to its match and store.
    pub fn new(
        store: Arc<LocalStore>,
        match_id: Uuid,
        clock: Arc<tokio::sync::Mutex<MatchClock>>,
    ) -> Self {
        Self {
            store,
            match_id,
            clock,
        }
    }

    /// Shared clock driven through this handle.
    pub fn clock(&self) -> Arc<tokio::sync::Mutex<MatchClock>> {
        self.clock.clone()
    }

    /// Start the clock and checkpoint the new status.
    pub async fn start(&self) -> StoreResult<()> {
        let mut clock = self.clock.lock().await;
        clock.start(Instant::now());
        save_checkpoint(&self.store, self.match_id, &clock).await
    }

    /// Pause the clock and checkpoint the frozen elapsed value.
    pub async fn pause(&self) -> StoreResult<()> {
        let mut clock = self.clock.lock().await;
        clock.pause(Instant::now());
        save_checkpoint(&self.store, self.match_id, &clock).await
    }

    /// Stop the clock and checkpoint the final elapsed value.
    pub async fn stop(&self) -> StoreResult<()> {
        let mut clock = self.clock.lock().await;
        clock.stop(Instant::now());
        save_checkpoint(&self.store, self.match_id, &clock).await
    }
}

/// Drive the clock until it stops: tick on every `tick_period`, publish the
/// elapsed value over `elapsed_tx`, and checkpoint on `checkpoint_period`
/// while running or paused so drift recovery granularity stays bounded.
/// Checkpoints are also written on the finishing tick; status changes are
/// checkpointed by [`ClockHandle`], not here.
///
/// Returns once the clock reaches the match duration, is stopped through its
/// handle after having run, or every receiver of `elapsed_tx` is gone. A
/// clock that is stopped because it has not started yet keeps the driver
/// waiting.
pub async fn run_clock(
    store: Arc<LocalStore>,
    match_id: Uuid,
    clock: Arc<tokio::sync::Mutex<MatchClock>>,
    tick_period: std::time::Duration,
    checkpoint_period: std::time::Duration,
    elapsed_tx: watch::Sender<ClockTick>,
) -> StoreResult<()> {
    let mut ticker = interval(tick_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_checkpoint = Instant::now();
    let mut was_active = false;

    loop {
        ticker.tick().await;
        let now = Instant::now();

        let (tick, status) = {
            let mut clock = clock.lock().await;
            (clock.tick(now), clock.status())
        };

        if elapsed_tx.send(tick).is_err() {
            return Ok(());
        }

        let due = now.saturating_duration_since(last_checkpoint) >= checkpoint_period;
        if tick.finished || (due && status != ClockStatus::Stopped) {
            let clock = clock.lock().await;
            save_checkpoint(&store, match_id, &clock).await?;
            last_checkpoint = now;
        }

        if tick.finished {
            info!(%match_id, elapsed_ms = tick.elapsed_ms, "match clock ran out");
            return Ok(());
        }

        if status != ClockStatus::Stopped {
            was_active = true;
        } else if was_active || tick.elapsed_ms > 0 {
            // Manual stop (already checkpointed by the handle) or a restored
            // finished clock; nothing left to drive.
            debug!(%match_id, elapsed_ms = tick.elapsed_ms, "clock stopped; driver exiting");
            return Ok(());
        }
    }
}

/// Render milliseconds as `MM:SS`, flooring to whole seconds. Non-finite
/// input renders as zero; negative values (a deficit carried over from a
/// previous session) keep a leading sign.
pub fn format_time(ms: f64) -> String {
    let ms = if ms.is_finite() { ms } else { 0.0 };
    let total_seconds = (ms.abs() / 1000.0).floor() as i64;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    if ms < 0.0 && total_seconds > 0 {
        format!("-{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const DURATION_MS: i64 = 45 * 60 * 1000;

    #[test]
    fn ticks_accumulate_and_clamp_to_duration() {
        let mut clock = MatchClock::new(2_000);
        let t0 = Instant::now();
        clock.start(t0);

        assert_eq!(clock.tick(t0 + Duration::from_millis(500)).elapsed_ms, 500);
        assert_eq!(
            clock.tick(t0 + Duration::from_millis(1_500)).elapsed_ms,
            1_500
        );

        let last = clock.tick(t0 + Duration::from_millis(5_000));
        assert_eq!(last.elapsed_ms, 2_000);
        assert!(last.finished);
        assert_eq!(clock.status(), ClockStatus::Stopped);
    }

    #[test]
    fn pause_freezes_and_resume_continues() {
        let mut clock = MatchClock::new(DURATION_MS);
        let t0 = Instant::now();
        clock.start(t0);
        clock.tick(t0 + Duration::from_millis(1_000));
        clock.pause(t0 + Duration::from_millis(1_500));
        assert_eq!(clock.elapsed_ms(), 1_500);

        // Time passing while paused does not accrue.
        clock.start(t0 + Duration::from_millis(9_000));
        let tick = clock.tick(t0 + Duration::from_millis(9_400));
        assert_eq!(tick.elapsed_ms, 1_900);
    }

    #[test]
    fn stop_caps_elapsed_to_duration() {
        let mut clock = MatchClock::new(1_000);
        let t0 = Instant::now();
        clock.start(t0);
        clock.stop(t0 + Duration::from_millis(3_000));
        assert_eq!(clock.elapsed_ms(), 1_000);
        assert_eq!(clock.status(), ClockStatus::Stopped);
    }

    #[test]
    fn restore_adds_drift_while_running() {
        let checkpoint = ClockCheckpoint {
            status: ClockStatus::Running,
            elapsed_ms: 10_000,
            anchor: 1_000_000,
        };
        let clock = MatchClock::restore(&checkpoint, DURATION_MS, 1_000_000 + 25_000);
        assert_eq!(clock.elapsed_ms(), 35_000);
        assert_eq!(clock.status(), ClockStatus::Running);
    }

    #[test]
    fn restore_clamps_drift_and_stops_at_duration() {
        let checkpoint = ClockCheckpoint {
            status: ClockStatus::Running,
            elapsed_ms: DURATION_MS - 1_000,
            anchor: 0,
        };
        let clock = MatchClock::restore(&checkpoint, DURATION_MS, 60_000);
        assert_eq!(clock.elapsed_ms(), DURATION_MS);
        assert_eq!(clock.status(), ClockStatus::Stopped);
    }

    #[test]
    fn restore_ignores_drift_while_paused() {
        let checkpoint = ClockCheckpoint {
            status: ClockStatus::Paused,
            elapsed_ms: 12_345,
            anchor: 0,
        };
        let clock = MatchClock::restore(&checkpoint, DURATION_MS, 99_999_999);
        assert_eq!(clock.elapsed_ms(), 12_345);
        assert_eq!(clock.status(), ClockStatus::Paused);
    }

    #[test]
    fn format_time_table() {
        assert_eq!(format_time(0.0), "00:00");
        assert_eq!(format_time(59_000.0), "00:59");
        assert_eq!(format_time(60_000.0), "01:00");
        assert_eq!(format_time(f64::NAN), "00:00");
        assert_eq!(format_time(f64::INFINITY), "00:00");
        assert_eq!(format_time(-60_000.0), "-01:00");
    }

    #[tokio::test]
    async fn checkpoint_roundtrips_through_store() {
        let store = LocalStore::open_in_memory().unwrap();
        let match_id = Uuid::new_v4();
        let mut clock = MatchClock::new(DURATION_MS);
        let t0 = Instant::now();
        clock.start(t0);
        clock.tick(t0 + Duration::from_millis(2_000));
        clock.pause(t0 + Duration::from_millis(2_000));

        save_checkpoint(&store, match_id, &clock).await.unwrap();
        let restored = load_clock(&store, match_id, DURATION_MS).await.unwrap();
        assert_eq!(restored.elapsed_ms(), 2_000);
        assert_eq!(restored.status(), ClockStatus::Paused);
    }

    fn spawn_driver(
        store: &Arc<LocalStore>,
        match_id: Uuid,
        clock: &Arc<tokio::sync::Mutex<MatchClock>>,
    ) -> (
        tokio::task::JoinHandle<StoreResult<()>>,
        watch::Receiver<ClockTick>,
    ) {
        let (tick_tx, tick_rx) = watch::channel(ClockTick {
            elapsed_ms: 0,
            finished: false,
        });
        let driver = tokio::spawn(run_clock(
            store.clone(),
            match_id,
            clock.clone(),
            Duration::from_millis(5),
            Duration::from_secs(60),
            tick_tx,
        ));
        (driver, tick_rx)
    }

    #[tokio::test]
    async fn pause_checkpoints_before_the_periodic_interval() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let match_id = Uuid::new_v4();
        let clock = Arc::new(tokio::sync::Mutex::new(MatchClock::new(DURATION_MS)));
        let handle = ClockHandle::new(store.clone(), match_id, clock.clone());
        // Checkpoint period of a minute: only status changes may write here.
        let (driver, _tick_rx) = spawn_driver(&store, match_id, &clock);

        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.pause().await.unwrap();

        let checkpoint: ClockCheckpoint = store
            .get_meta(&keys::clock_checkpoint(match_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.status, ClockStatus::Paused);
        assert!(checkpoint.elapsed_ms > 0);

        // An hour of wall-clock drift must not inflate a frozen clock.
        let restored = MatchClock::restore(&checkpoint, DURATION_MS, checkpoint.anchor + 3_600_000);
        assert_eq!(restored.elapsed_ms(), checkpoint.elapsed_ms);
        assert_eq!(restored.status(), ClockStatus::Paused);

        driver.abort();
    }

    #[tokio::test]
    async fn driver_exits_after_a_manual_stop() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let match_id = Uuid::new_v4();
        let clock = Arc::new(tokio::sync::Mutex::new(MatchClock::new(DURATION_MS)));
        let handle = ClockHandle::new(store.clone(), match_id, clock.clone());
        let (driver, _tick_rx) = spawn_driver(&store, match_id, &clock);

        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop().await.unwrap();

        let joined = tokio::time::timeout(Duration::from_secs(1), driver)
            .await
            .expect("driver keeps running after the clock stopped");
        assert!(joined.unwrap().is_ok());

        let checkpoint: ClockCheckpoint = store
            .get_meta(&keys::clock_checkpoint(match_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.status, ClockStatus::Stopped);
    }

    #[tokio::test]
    async fn load_without_checkpoint_gives_fresh_clock() {
        let store = LocalStore::open_in_memory().unwrap();
        let clock = load_clock(&store, Uuid::new_v4(), DURATION_MS).await.unwrap();
        assert_eq!(clock.elapsed_ms(), 0);
        assert_eq!(clock.status(), ClockStatus::Stopped);
    }
}
