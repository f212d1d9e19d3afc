use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::slot::SlotRequest;
use crate::domain::user::{ChannelId, ChatUser, UserId};
use crate::errors::ApplicationError;
use crate::ledger::{Reservation, ReservationLedger};
use crate::persistence::{ReservationStore, StoreError};
use crate::ports::{Clock, Notifier, ReminderNotice, ReminderNoticeKind, UserDirectory};
use crate::reminders::{ReminderPlan, ReminderRegistry, ReminderSettings};

/// Owns the ledger and everything that touches it: persistence after each
/// mutation and the reminder task of each booking.
///
/// Cloning is cheap and every clone shares the same ledger.
#[derive(Clone)]
pub struct ReservationService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    ledger: Mutex<ReservationLedger>,
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    reminders: ReminderRegistry,
    settings: ReminderSettings,
    restored: AtomicBool,
}

impl ReservationService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        settings: ReminderSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                ledger: Mutex::new(ReservationLedger::new()),
                store,
                clock,
                notifier,
                reminders: ReminderRegistry::new(),
                settings,
                restored: AtomicBool::new(false),
            }),
        }
    }

    /// Loads the persisted ledger and reschedules its reminders. Only the
    /// first call does anything, so repeated ready events are harmless.
    ///
    /// Restored reminders have no channel to speak in; they still release
    /// their slot on time.
    pub async fn restore(&self, directory: &dyn UserDirectory) -> Result<usize, ApplicationError> {
        if self.inner.restored.swap(true, Ordering::SeqCst) {
            debug!(event_name = "reservations.restore.skipped", "ledger already restored");
            return Ok(self.inner.ledger.lock().await.len());
        }

        let snapshot = match self.inner.store.load() {
            Ok(snapshot) => snapshot,
            Err(error) => {
                self.inner.restored.store(false, Ordering::SeqCst);
                return Err(persistence_error(error));
            }
        };

        let mut owners = HashMap::new();
        for owner_id in snapshot.owner_ids() {
            match directory.resolve(owner_id).await {
                Some(user) => {
                    owners.insert(owner_id, user);
                }
                None => warn!(
                    event_name = "reservations.restore.owner_unresolved",
                    user_id = %owner_id,
                    "persisted owner could not be resolved; slot stays reserved"
                ),
            }
        }

        let restored = ReservationLedger::from_snapshot(&snapshot, &owners);
        let now = self.inner.clock.now();
        let mut ledger = self.inner.ledger.lock().await;
        self.inner.reminders.cancel_all();
        *ledger = restored;
        for reservation in ledger.list_active() {
            self.schedule_reminder(reservation, None, now);
        }

        info!(
            event_name = "reservations.restore.completed",
            reservations = ledger.len(),
            unresolved_owners = snapshot.owner_ids().len() - owners.len(),
            "reservation ledger restored"
        );
        Ok(ledger.len())
    }

    pub async fn reserve(
        &self,
        user: &ChatUser,
        channel: &ChannelId,
        request: &SlotRequest,
    ) -> Result<Reservation, ApplicationError> {
        let now = self.inner.clock.now();
        let mut ledger = self.inner.ledger.lock().await;
        let reservation = ledger.reserve(user, request, now)?;

        if let Err(error) = self.inner.store.save(&ledger.snapshot()) {
            ledger.remove_slot(&reservation.key);
            return Err(persistence_error(error));
        }

        self.schedule_reminder(reservation.clone(), Some(channel.clone()), now);
        Ok(reservation)
    }

    /// Frees the caller's slot. `Ok(None)` means there was nothing to free.
    pub async fn release(&self, user: UserId) -> Result<Option<Reservation>, ApplicationError> {
        let mut ledger = self.inner.ledger.lock().await;
        let Some(reservation) = ledger.release(user) else {
            return Ok(None);
        };

        if let Err(error) = self.inner.store.save(&ledger.snapshot()) {
            ledger.reinstate(reservation)?;
            return Err(persistence_error(error));
        }

        self.inner.reminders.cancel(&reservation.key);
        Ok(Some(reservation))
    }

    pub async fn list_active(&self) -> Vec<Reservation> {
        self.inner.ledger.lock().await.list_active()
    }

    pub async fn active_slot(&self, user: UserId) -> Option<NaiveDateTime> {
        self.inner.ledger.lock().await.active_slot(user)
    }

    pub fn pending_reminders(&self) -> usize {
        self.inner.reminders.pending_count()
    }

    pub fn reminder_settings(&self) -> ReminderSettings {
        self.inner.settings
    }

    /// Aborts every pending reminder. The ledger on disk is already current.
    pub fn shutdown(&self) -> usize {
        self.inner.reminders.cancel_all()
    }

    fn schedule_reminder(
        &self,
        reservation: Reservation,
        channel: Option<ChannelId>,
        now: NaiveDateTime,
    ) {
        let plan = ReminderPlan::compute(reservation.start(), now, self.inner.settings);
        let key = reservation.key;
        let service = self.clone();

        debug!(
            event_name = "reservations.reminder.scheduled",
            slot = %key,
            user_id = %reservation.owner_id,
            warn_after = ?plan.warn_after,
            release_after = ?plan.release_after,
            "reminder scheduled"
        );

        self.inner.reminders.spawn(key, move |generation| async move {
            service.run_reminder(reservation, channel, plan).await;
            service.inner.reminders.finish(&key, generation);
        });
    }

    async fn run_reminder(
        &self,
        reservation: Reservation,
        channel: Option<ChannelId>,
        plan: ReminderPlan,
    ) {
        if let Some(wait) = plan.warn_after {
            tokio::time::sleep(wait).await;
            let kind =
                ReminderNoticeKind::StartingSoon { minutes: self.inner.settings.lead_minutes() };
            self.send_notice(channel.as_ref(), notice(kind, &reservation)).await;
        }

        tokio::time::sleep(plan.release_after).await;

        if let Some(released) = self.expire(&reservation).await {
            self.send_notice(channel.as_ref(), notice(ReminderNoticeKind::Started, &released))
                .await;
        }
    }

    /// Removes the slot if it still belongs to the same owner. A failed save
    /// is logged and the removal kept: the turn has started either way and
    /// the next successful save brings the file up to date.
    async fn expire(&self, reservation: &Reservation) -> Option<Reservation> {
        let mut ledger = self.inner.ledger.lock().await;
        let still_owned = ledger
            .get(&reservation.key)
            .is_some_and(|current| current.owner_id == reservation.owner_id);
        if !still_owned {
            debug!(
                event_name = "reservations.reminder.already_released",
                slot = %reservation.key,
                "slot released before its turn started"
            );
            return None;
        }

        let released = ledger.remove_slot(&reservation.key)?;
        if let Err(error) = self.inner.store.save(&ledger.snapshot()) {
            warn!(
                event_name = "reservations.reminder.persist_failed",
                slot = %reservation.key,
                error = %error,
                "could not persist automatic release"
            );
        }

        info!(
            event_name = "reservations.reminder.released",
            slot = %released.key,
            user_id = %released.owner_id,
            "turn started; slot released"
        );
        Some(released)
    }

    async fn send_notice(&self, channel: Option<&ChannelId>, notice: ReminderNotice) {
        let Some(channel) = channel else {
            info!(
                event_name = "reservations.reminder.no_channel",
                slot = %notice.key,
                user_id = %notice.owner_id,
                kind = ?notice.kind,
                "reminder has no channel; notice not sent"
            );
            return;
        };

        if let Err(error) = self.inner.notifier.notify(channel, &notice).await {
            warn!(
                event_name = "reservations.reminder.notify_failed",
                slot = %notice.key,
                channel_id = %channel,
                error = %error,
                "failed to deliver reminder notice"
            );
        }
    }
}

fn notice(kind: ReminderNoticeKind, reservation: &Reservation) -> ReminderNotice {
    ReminderNotice {
        kind,
        key: reservation.key,
        owner_id: reservation.owner_id,
        owner: reservation.owner.clone(),
    }
}

fn persistence_error(error: StoreError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};

    use super::ReservationService;
    use crate::domain::slot::SlotRequest;
    use crate::domain::user::{ChannelId, ChatUser, UserId};
    use crate::errors::{ApplicationError, DomainError};
    use crate::persistence::{InMemoryReservationStore, LedgerSnapshot, PersistedSlot};
    use crate::ports::{
        FixedClock, Notifier, ReminderNotice, ReminderNoticeKind, StaticUserDirectory,
    };
    use crate::reminders::ReminderSettings;

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<(ChannelId, ReminderNotice)>>,
    }

    impl RecordingNotifier {
        fn kinds(&self) -> Vec<ReminderNoticeKind> {
            self.notices
                .lock()
                .expect("lock")
                .iter()
                .map(|(_, notice)| notice.kind.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            channel: &ChannelId,
            notice: &ReminderNotice,
        ) -> Result<(), ApplicationError> {
            self.notices.lock().expect("lock").push((channel.clone(), notice.clone()));
            Ok(())
        }
    }

    struct Harness {
        service: ReservationService,
        store: Arc<InMemoryReservationStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, day)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .expect("valid fixture date")
    }

    fn harness_with_store(store: InMemoryReservationStore) -> Harness {
        let store = Arc::new(store);
        let notifier = Arc::new(RecordingNotifier::default());
        let service = ReservationService::new(
            store.clone(),
            Arc::new(FixedClock::new(at(10, 9, 0))),
            notifier.clone(),
            ReminderSettings::default(),
        );
        Harness { service, store, notifier }
    }

    fn harness() -> Harness {
        harness_with_store(InMemoryReservationStore::new())
    }

    fn channel() -> ChannelId {
        ChannelId("general".to_owned())
    }

    fn request(raw: &str) -> SlotRequest {
        SlotRequest::parse(raw).expect("valid request")
    }

    fn ana() -> ChatUser {
        ChatUser::new(1, "ana")
    }

    fn bruno() -> ChatUser {
        ChatUser::new(2, "bruno")
    }

    #[tokio::test(start_paused = true)]
    async fn reserve_persists_and_schedules_a_reminder() {
        let harness = harness();

        let reservation = harness
            .service
            .reserve(&ana(), &channel(), &request("12/15:00"))
            .await
            .expect("reserve");

        assert_eq!(reservation.key.to_string(), "2025-03-12 15:00");
        assert_eq!(
            harness.store.current().entries.get("2025-03-12 15:00"),
            Some(&PersistedSlot(1, "2025-03-12 16:00".to_owned()))
        );
        assert_eq!(harness.store.save_count(), 1);
        assert_eq!(harness.service.pending_reminders(), 1);
        assert_eq!(harness.service.active_slot(UserId(1)).await, Some(reservation.start()));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_reservation_does_not_persist() {
        let harness = harness();
        harness.service.reserve(&ana(), &channel(), &request("12/15:00")).await.expect("first");

        let error = harness
            .service
            .reserve(&bruno(), &channel(), &request("12/15:00"))
            .await
            .expect_err("taken");

        assert!(matches!(error, ApplicationError::Domain(DomainError::SlotTaken { .. })));
        assert_eq!(harness.store.save_count(), 1);
        assert_eq!(harness.service.pending_reminders(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_rolls_back_reservation() {
        let harness = harness();
        harness.store.fail_saves(true);

        let error = harness
            .service
            .reserve(&ana(), &channel(), &request("12/15:00"))
            .await
            .expect_err("save fails");

        assert!(matches!(error, ApplicationError::Persistence(_)));
        assert!(harness.service.list_active().await.is_empty());
        assert_eq!(harness.service.pending_reminders(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn release_persists_absence_and_cancels_reminder() {
        let harness = harness();
        harness.service.reserve(&ana(), &channel(), &request("10/10:00")).await.expect("reserve");

        let released = harness.service.release(UserId(1)).await.expect("release");

        assert_eq!(released.map(|r| r.key.to_string()).as_deref(), Some("2025-03-10 10:00"));
        assert!(harness.store.current().is_empty());
        assert_eq!(harness.service.pending_reminders(), 0);

        tokio::time::sleep(Duration::from_secs(2 * 60 * 60)).await;
        assert!(harness.notifier.kinds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn release_without_reservation_is_neutral() {
        let harness = harness();

        assert_eq!(harness.service.release(UserId(1)).await.expect("release"), None);
        assert_eq!(harness.store.save_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_release_save_keeps_reservation() {
        let harness = harness();
        harness.service.reserve(&ana(), &channel(), &request("12/15:00")).await.expect("reserve");
        harness.store.fail_saves(true);

        let error = harness.service.release(UserId(1)).await.expect_err("save fails");

        assert!(matches!(error, ApplicationError::Persistence(_)));
        assert_eq!(harness.service.list_active().await.len(), 1);
        assert_eq!(harness.service.pending_reminders(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reminder_warns_then_releases_when_turn_starts() {
        let harness = harness();
        harness.service.reserve(&ana(), &channel(), &request("10/10:00")).await.expect("reserve");

        tokio::time::sleep(Duration::from_secs(54 * 60)).await;
        assert!(harness.notifier.kinds().is_empty());

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(harness.notifier.kinds(), vec![ReminderNoticeKind::StartingSoon { minutes: 5 }]);
        assert_eq!(harness.service.list_active().await.len(), 1);

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(
            harness.notifier.kinds(),
            vec![ReminderNoticeKind::StartingSoon { minutes: 5 }, ReminderNoticeKind::Started]
        );
        assert!(harness.service.list_active().await.is_empty());
        assert!(harness.store.current().is_empty());
        assert_eq!(harness.service.pending_reminders(), 0);
        assert_eq!(harness.service.active_slot(UserId(1)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn late_booking_skips_warning_but_still_releases() {
        let harness = harness();
        harness.service.reserve(&ana(), &channel(), &request("10/09:02")).await.expect("reserve");

        tokio::time::sleep(Duration::from_secs(6 * 60)).await;

        assert_eq!(harness.notifier.kinds(), vec![ReminderNoticeKind::Started]);
        assert!(harness.service.list_active().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restore_resolves_owners_and_reschedules_without_channel() {
        let mut snapshot = LedgerSnapshot::default();
        snapshot
            .entries
            .insert("2025-03-10 10:00".to_owned(), PersistedSlot(1, "2025-03-10 11:00".to_owned()));
        snapshot
            .entries
            .insert("2025-03-12 15:00".to_owned(), PersistedSlot(7, "2025-03-12 16:00".to_owned()));
        let harness = harness_with_store(InMemoryReservationStore::with_snapshot(snapshot));
        let directory = StaticUserDirectory::new([ana()]);

        let count = harness.service.restore(&directory).await.expect("restore");

        assert_eq!(count, 2);
        let active = harness.service.list_active().await;
        assert_eq!(active[0].owner, Some(ana()));
        assert_eq!(active[1].owner, None);
        assert_eq!(harness.service.pending_reminders(), 2);

        let again = harness.service.restore(&directory).await.expect("second restore");
        assert_eq!(again, 2);

        tokio::time::sleep(Duration::from_secs(61 * 60)).await;
        assert!(harness.notifier.kinds().is_empty());
        assert_eq!(harness.service.list_active().await.len(), 1);
        assert_eq!(harness.store.current().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restored_reservation_blocks_its_owner() {
        let mut snapshot = LedgerSnapshot::default();
        snapshot
            .entries
            .insert("2025-03-12 15:00".to_owned(), PersistedSlot(1, "2025-03-12 16:00".to_owned()));
        let harness = harness_with_store(InMemoryReservationStore::with_snapshot(snapshot));
        harness.service.restore(&StaticUserDirectory::default()).await.expect("restore");

        let error = harness
            .service
            .reserve(&ana(), &channel(), &request("13/10:00"))
            .await
            .expect_err("already booked");

        assert!(matches!(error, ApplicationError::Domain(DomainError::UserAlreadyBooked { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_pending_reminders() {
        let harness = harness();
        harness.service.reserve(&ana(), &channel(), &request("12/15:00")).await.expect("ana");
        harness.service.reserve(&bruno(), &channel(), &request("13/15:00")).await.expect("bruno");

        assert_eq!(harness.service.shutdown(), 2);
        assert_eq!(harness.service.pending_reminders(), 0);
        assert_eq!(harness.service.list_active().await.len(), 2);
    }
}
