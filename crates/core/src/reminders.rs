//! Per-reservation reminder tasks.
//!
//! Each booking gets one task: optionally warn `lead` before the start, wait
//! another `lead`, then release the slot. Tasks live in a registry keyed by
//! slot so an explicit release can abort the matching task at once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::task::AbortHandle;

use crate::domain::slot::SlotKey;

pub const DEFAULT_LEAD_MINUTES: u64 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReminderSettings {
    pub lead: Duration,
}

impl ReminderSettings {
    pub fn from_minutes(minutes: u64) -> Self {
        Self { lead: Duration::from_secs(minutes * 60) }
    }

    pub fn lead_minutes(&self) -> i64 {
        i64::try_from(self.lead.as_secs() / 60).unwrap_or(i64::MAX)
    }
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self::from_minutes(DEFAULT_LEAD_MINUTES)
    }
}

/// Sleeps a reminder task performs, computed once when it is scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReminderPlan {
    /// `None` when the warning point has already passed.
    pub warn_after: Option<Duration>,
    /// Measured from the warning, or from scheduling when there is none.
    pub release_after: Duration,
}

impl ReminderPlan {
    pub fn compute(start: NaiveDateTime, now: NaiveDateTime, settings: ReminderSettings) -> Self {
        let lead = chrono::Duration::from_std(settings.lead)
            .unwrap_or_else(|_| chrono::Duration::weeks(52));
        let warn_after = (start - now)
            .checked_sub(&lead)
            .and_then(|wait| wait.to_std().ok())
            .filter(|wait| !wait.is_zero());

        Self { warn_after, release_after: settings.lead }
    }
}

struct RegisteredTask {
    generation: u64,
    handle: AbortHandle,
}

#[derive(Default)]
pub struct ReminderRegistry {
    tasks: Mutex<HashMap<SlotKey, RegisteredTask>>,
    next_generation: AtomicU64,
}

impl ReminderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the task built by `build` and registers it under `key`,
    /// aborting whatever was registered there before.
    ///
    /// `build` receives the task's generation, which the task passes back to
    /// [`ReminderRegistry::finish`] when it completes.
    pub fn spawn<F, Fut>(&self, key: SlotKey, build: F)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let mut tasks = self.lock();
        if let Some(previous) = tasks.remove(&key) {
            previous.handle.abort();
        }

        let handle = tokio::spawn(build(generation));
        tasks.insert(key, RegisteredTask { generation, handle: handle.abort_handle() });
    }

    pub fn cancel(&self, key: &SlotKey) -> bool {
        match self.lock().remove(key) {
            Some(task) => {
                task.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drops the registration of a task that ran to completion, unless the
    /// key has since been taken by a newer task.
    pub fn finish(&self, key: &SlotKey, generation: u64) {
        let mut tasks = self.lock();
        if tasks.get(key).is_some_and(|task| task.generation == generation) {
            tasks.remove(key);
        }
    }

    pub fn cancel_all(&self) -> usize {
        let mut tasks = self.lock();
        let count = tasks.len();
        for (_, task) in tasks.drain() {
            task.handle.abort();
        }
        count
    }

    pub fn is_pending(&self, key: &SlotKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SlotKey, RegisteredTask>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::{ReminderPlan, ReminderRegistry, ReminderSettings};
    use crate::domain::slot::SlotKey;

    fn at(hour: u32, minute: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .expect("valid fixture date")
    }

    #[test]
    fn plan_warns_lead_minutes_before_start() {
        let plan = ReminderPlan::compute(at(10, 0), at(9, 0), ReminderSettings::default());

        assert_eq!(plan.warn_after, Some(Duration::from_secs(55 * 60)));
        assert_eq!(plan.release_after, Duration::from_secs(5 * 60));
    }

    #[test]
    fn plan_skips_warning_inside_lead_window() {
        let plan = ReminderPlan::compute(at(10, 0), at(9, 57), ReminderSettings::default());

        assert_eq!(plan.warn_after, None);
        assert_eq!(plan.release_after, Duration::from_secs(5 * 60));
    }

    #[test]
    fn plan_skips_warning_exactly_at_lead_boundary() {
        let plan = ReminderPlan::compute(at(10, 0), at(9, 55), ReminderSettings::default());
        assert_eq!(plan.warn_after, None);
    }

    #[test]
    fn plan_honours_custom_lead() {
        let plan = ReminderPlan::compute(at(10, 0), at(9, 0), ReminderSettings::from_minutes(15));

        assert_eq!(plan.warn_after, Some(Duration::from_secs(45 * 60)));
        assert_eq!(plan.release_after, Duration::from_secs(15 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_runs() {
        let registry = ReminderRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let key = SlotKey::new(at(10, 0));

        let counter = fired.clone();
        registry.spawn(key, move |_| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(registry.is_pending(&key));
        assert!(registry.cancel(&key));
        assert!(!registry.cancel(&key));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn respawning_a_key_replaces_the_previous_task() {
        let registry = Arc::new(ReminderRegistry::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let key = SlotKey::new(at(10, 0));

        for _ in 0..2 {
            let counter = fired.clone();
            let handle = registry.clone();
            registry.spawn(key, move |generation| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                handle.finish(&key, generation);
            });
        }
        assert_eq!(registry.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn stale_generation_does_not_clear_newer_task() {
        let registry = ReminderRegistry::new();
        let key = SlotKey::new(at(10, 0));

        registry.spawn(key, |_| std::future::pending::<()>());
        registry.spawn(key, |_| std::future::pending::<()>());
        registry.finish(&key, 0);
        assert!(registry.is_pending(&key));

        registry.finish(&key, 1);
        assert!(!registry.is_pending(&key));
        assert_eq!(registry.cancel_all(), 0);
    }
}
