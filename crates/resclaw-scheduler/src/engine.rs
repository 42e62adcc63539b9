//! Slot scheduler — one one-shot timer per pending reservation slot.
//!
//! The scheduler owns a `slot_id → timer` map behind a mutex. Re-scheduling
//! a slot atomically replaces its timer (the old one is aborted before the
//! new one is visible), so a slot can never double-fire. Firing spawns the
//! dispatch routine on its own task: aborting a timer after it fired does
//! not cut a dispatch batch short.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use resclaw_db::ReservationDb;
use resclaw_uipath::UiPathClient;

use crate::dispatch;

struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Scheduler for reservation slots.
///
/// A single instance owns every armed timer in the process; it is created at
/// boot, `recover_pending` re-arms surviving slots, and `shutdown` disarms
/// everything.
pub struct SlotScheduler {
    db: Arc<ReservationDb>,
    client: Arc<UiPathClient>,
    /// Misfire grace: a timer waking this late still dispatches.
    grace: chrono::Duration,
    timers: Mutex<HashMap<i64, TimerEntry>>,
    next_generation: AtomicU64,
}

impl SlotScheduler {
    /// Create a scheduler. `grace_secs` is the misfire grace window.
    pub fn new(db: Arc<ReservationDb>, client: Arc<UiPathClient>, grace_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            db,
            client,
            grace: chrono::Duration::seconds(grace_secs as i64),
            timers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        })
    }

    /// Arm (or atomically re-arm) the one-shot timer for a slot.
    ///
    /// An existing timer for the same slot is aborted before the replacement
    /// becomes visible — exactly one timer per slot, firing at the most
    /// recently requested instant.
    pub fn schedule(self: &Arc<Self>, slot_id: i64, at: DateTime<Utc>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut timers = match self.timers.lock() {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("Scheduler timer map poisoned: {e}");
                return;
            }
        };

        let sched = self.clone();
        let handle = tokio::spawn(async move {
            let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;

            let late = Utc::now() - at;
            if late > sched.grace {
                tracing::warn!(
                    "Slot {slot_id} timer woke {}s past its instant (grace {}s) — not dispatching",
                    late.num_seconds(),
                    sched.grace.num_seconds()
                );
            } else {
                let db = sched.db.clone();
                let client = sched.client.clone();
                // Separate task: once firing begins, the batch runs to the
                // end even if this timer entry gets aborted or replaced.
                tokio::spawn(async move {
                    if let Err(e) = dispatch::process_slot(&db, &client, slot_id).await {
                        tracing::error!("Dispatch for slot {slot_id} failed: {e}");
                    }
                });
            }
            sched.finish(slot_id, generation);
        });

        if let Some(prev) = timers.insert(slot_id, TimerEntry { generation, handle }) {
            prev.handle.abort();
            tracing::info!("Rescheduled slot {slot_id} for {at}");
        } else {
            tracing::info!("Scheduled slot {slot_id} for {at}");
        }
    }

    /// Disarm the timer for a slot if one is armed; no-op otherwise.
    pub fn cancel(&self, slot_id: i64) {
        let Ok(mut timers) = self.timers.lock() else { return };
        if let Some(entry) = timers.remove(&slot_id) {
            entry.handle.abort();
            tracing::info!("Cancelled timer for slot {slot_id}");
        }
    }

    /// Re-arm timers for every unprocessed slot whose instant is still in
    /// the future. Slots whose instant already passed are left un-fired and
    /// logged — stale work is not bulk-dispatched after downtime.
    ///
    /// Returns (re-armed, skipped).
    pub fn recover_pending(self: &Arc<Self>) -> Result<(usize, usize), String> {
        let pending = self.db.pending_slots()?;
        let now = Utc::now();
        let mut rearmed = 0;
        let mut skipped = 0;

        for slot in &pending {
            if slot.scheduled_datetime > now {
                self.schedule(slot.id, slot.scheduled_datetime);
                rearmed += 1;
            } else {
                tracing::warn!(
                    "Slot {} scheduled time {} has passed — leaving un-dispatched",
                    slot.id,
                    slot.scheduled_datetime
                );
                skipped += 1;
            }
        }

        tracing::info!("Recovered pending slots: {rearmed} re-armed, {skipped} skipped");
        Ok((rearmed, skipped))
    }

    /// Abort every armed timer.
    pub fn shutdown(&self) {
        let Ok(mut timers) = self.timers.lock() else { return };
        let count = timers.len();
        for (_, entry) in timers.drain() {
            entry.handle.abort();
        }
        if count > 0 {
            tracing::info!("Scheduler shut down ({count} timer(s) disarmed)");
        }
    }

    /// Number of currently armed timers.
    pub fn armed_count(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// A fired timer removes its own map entry — but only its own
    /// generation, never a replacement armed in the meantime.
    fn finish(&self, slot_id: i64, generation: u64) {
        let Ok(mut timers) = self.timers.lock() else { return };
        if timers.get(&slot_id).is_some_and(|e| e.generation == generation) {
            timers.remove(&slot_id);
        }
    }
}

impl Drop for SlotScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resclaw_core::config::UiPathConfig;
    use std::path::PathBuf;

    fn temp_db() -> Arc<ReservationDb> {
        Arc::new(ReservationDb::open(&PathBuf::from(":memory:")).unwrap())
    }

    fn dead_client() -> Arc<UiPathClient> {
        // no customers are dispatched in these tests, or failures are fine
        Arc::new(UiPathClient::new(&UiPathConfig {
            api_url: "http://127.0.0.1:9".into(),
            auth_timeout_secs: 1,
            send_timeout_secs: 1,
            ..UiPathConfig::default()
        }))
    }

    /// Give fired timers and their spawned dispatch a chance to run.
    async fn wait_processed(db: &Arc<ReservationDb>, slot_id: i64) -> bool {
        for _ in 0..50 {
            if db.get_slot(slot_id).unwrap().unwrap().is_processed {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_once_and_processes_slot() {
        let db = temp_db();
        let sched = SlotScheduler::new(db.clone(), dead_client(), 300);

        let area = db.create_area("north", "", "").unwrap();
        let slot = db.create_slot(area.id, Utc::now() + chrono::Duration::hours(1)).unwrap();

        sched.schedule(slot.id, slot.scheduled_datetime);
        assert_eq!(sched.armed_count(), 1);

        // paused clock: sleeping past the deadline fires the timer
        tokio::time::sleep(Duration::from_secs(3700)).await;
        assert!(wait_processed(&db, slot.id).await);
        assert_eq!(sched.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_timer() {
        let db = temp_db();
        let sched = SlotScheduler::new(db.clone(), dead_client(), 300);

        let area = db.create_area("north", "", "").unwrap();
        let slot = db.create_slot(area.id, Utc::now() + chrono::Duration::hours(1)).unwrap();

        sched.schedule(slot.id, Utc::now() + chrono::Duration::hours(1));
        sched.schedule(slot.id, Utc::now() + chrono::Duration::hours(2));
        assert_eq!(sched.armed_count(), 1);

        // past the first instant: the replaced timer must NOT have fired
        tokio::time::sleep(Duration::from_secs(3700)).await;
        assert!(!db.get_slot(slot.id).unwrap().unwrap().is_processed);

        // past the second instant: fires once
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(wait_processed(&db, slot.id).await);
        assert_eq!(sched.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_disarms_timer() {
        let db = temp_db();
        let sched = SlotScheduler::new(db.clone(), dead_client(), 300);

        let area = db.create_area("north", "", "").unwrap();
        let slot = db.create_slot(area.id, Utc::now() + chrono::Duration::minutes(30)).unwrap();

        sched.schedule(slot.id, slot.scheduled_datetime);
        sched.cancel(slot.id);
        assert_eq!(sched.armed_count(), 0);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!db.get_slot(slot.id).unwrap().unwrap().is_processed);

        // cancelling again is a no-op
        sched.cancel(slot.id);
    }

    #[tokio::test]
    async fn test_fire_beyond_grace_is_skipped() {
        let db = temp_db();
        let sched = SlotScheduler::new(db.clone(), dead_client(), 300);

        let area = db.create_area("north", "", "").unwrap();
        // instant far in the past: the timer wakes immediately, sees it is
        // way past the grace window, and refuses to dispatch
        let at = Utc::now() - chrono::Duration::minutes(10);
        let slot = db.create_slot(area.id, at).unwrap();

        sched.schedule(slot.id, at);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!db.get_slot(slot.id).unwrap().unwrap().is_processed);
        assert_eq!(sched.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_fire_slightly_late_within_grace_dispatches() {
        let db = temp_db();
        let sched = SlotScheduler::new(db.clone(), dead_client(), 300);

        let area = db.create_area("north", "", "").unwrap();
        let at = Utc::now() - chrono::Duration::seconds(30);
        let slot = db.create_slot(area.id, at).unwrap();

        sched.schedule(slot.id, at);
        assert!(wait_processed(&db, slot.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_pending_rearms_future_skips_past() {
        let db = temp_db();
        let sched = SlotScheduler::new(db.clone(), dead_client(), 300);

        let area = db.create_area("north", "", "").unwrap();
        let future = db.create_slot(area.id, Utc::now() + chrono::Duration::hours(1)).unwrap();
        let past = db.create_slot(area.id, Utc::now() - chrono::Duration::hours(1)).unwrap();
        let done = db.create_slot(area.id, Utc::now() + chrono::Duration::hours(2)).unwrap();
        db.mark_slot_processed(done.id).unwrap();

        let (rearmed, skipped) = sched.recover_pending().unwrap();
        assert_eq!(rearmed, 1);
        assert_eq!(skipped, 1);
        assert_eq!(sched.armed_count(), 1);

        tokio::time::sleep(Duration::from_secs(3700)).await;
        assert!(wait_processed(&db, future.id).await);
        // the stale slot stays un-fired
        assert!(!db.get_slot(past.id).unwrap().unwrap().is_processed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_for_deleted_slot_noops() {
        let db = temp_db();
        let sched = SlotScheduler::new(db.clone(), dead_client(), 300);

        let area = db.create_area("north", "", "").unwrap();
        let slot = db.create_slot(area.id, Utc::now() + chrono::Duration::minutes(5)).unwrap();

        sched.schedule(slot.id, slot.scheduled_datetime);
        db.delete_slot(slot.id).unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // timer fired into a missing slot and did nothing
        assert_eq!(sched.armed_count(), 0);
        assert!(db.list_attempts(None, None).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disarms_all() {
        let db = temp_db();
        let sched = SlotScheduler::new(db.clone(), dead_client(), 300);

        let area = db.create_area("north", "", "").unwrap();
        for _ in 0..3 {
            let slot = db.create_slot(area.id, Utc::now() + chrono::Duration::hours(1)).unwrap();
            sched.schedule(slot.id, slot.scheduled_datetime);
        }
        assert_eq!(sched.armed_count(), 3);

        sched.shutdown();
        assert_eq!(sched.armed_count(), 0);
    }
}
