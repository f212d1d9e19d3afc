//! Reservation bookkeeping.
//!
//! The ledger keeps two views of the same data: slot key to reservation, and
//! user to the start of their single active slot. Both are only ever mutated
//! together inside this module, which is what keeps a user at one slot.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use tracing::warn;

use crate::domain::slot::{format_slot_time, parse_slot_time, SlotKey, SlotRequest};
use crate::domain::user::{ChatUser, UserId};
use crate::errors::DomainError;
use crate::persistence::{LedgerSnapshot, PersistedSlot};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub key: SlotKey,
    pub owner_id: UserId,
    /// `None` when the owner could not be resolved after a restart.
    pub owner: Option<ChatUser>,
    pub end: NaiveDateTime,
}

impl Reservation {
    pub fn start(&self) -> NaiveDateTime {
        self.key.start()
    }

    pub fn owner_mention(&self) -> Option<String> {
        self.owner.as_ref().map(ChatUser::mention)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ReservationLedger {
    reservations: BTreeMap<SlotKey, Reservation>,
    active_by_user: HashMap<UserId, NaiveDateTime>,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and books `request` for `user`.
    ///
    /// Checks run in a fixed order: date validity, past, user already booked,
    /// slot taken. The ledger is untouched on every error path.
    pub fn reserve(
        &mut self,
        user: &ChatUser,
        request: &SlotRequest,
        now: NaiveDateTime,
    ) -> Result<Reservation, DomainError> {
        let start = request.resolve(now)?;

        if start < now {
            return Err(DomainError::InPast { requested: start });
        }

        if let Some(existing) = self.active_by_user.get(&user.id) {
            return Err(DomainError::UserAlreadyBooked { existing: *existing });
        }

        let key = SlotKey::new(start);
        if self.reservations.contains_key(&key) {
            return Err(DomainError::SlotTaken { key });
        }

        let reservation =
            Reservation { key, owner_id: user.id, owner: Some(user.clone()), end: key.end() };
        self.insert(reservation.clone());
        Ok(reservation)
    }

    pub fn release(&mut self, user: UserId) -> Option<Reservation> {
        let start = self.active_by_user.remove(&user)?;
        self.reservations.remove(&SlotKey::new(start))
    }

    /// Removes a slot regardless of who asked. Used when a turn starts.
    pub fn remove_slot(&mut self, key: &SlotKey) -> Option<Reservation> {
        let reservation = self.reservations.remove(key)?;
        if self.active_by_user.get(&reservation.owner_id) == Some(&reservation.start()) {
            self.active_by_user.remove(&reservation.owner_id);
        }
        Some(reservation)
    }

    /// Puts back a reservation that was removed, e.g. when persisting the
    /// removal failed.
    pub fn reinstate(&mut self, reservation: Reservation) -> Result<(), DomainError> {
        if let Some(existing) = self.active_by_user.get(&reservation.owner_id) {
            return Err(DomainError::UserAlreadyBooked { existing: *existing });
        }
        if self.reservations.contains_key(&reservation.key) {
            return Err(DomainError::SlotTaken { key: reservation.key });
        }

        self.insert(reservation);
        Ok(())
    }

    pub fn get(&self, key: &SlotKey) -> Option<&Reservation> {
        self.reservations.get(key)
    }

    pub fn active_slot(&self, user: UserId) -> Option<NaiveDateTime> {
        self.active_by_user.get(&user).copied()
    }

    /// All reservations in ascending key order.
    pub fn list_active(&self) -> Vec<Reservation> {
        self.reservations.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            entries: self
                .reservations
                .values()
                .map(|reservation| {
                    (
                        reservation.key.to_string(),
                        PersistedSlot(reservation.owner_id.0, format_slot_time(reservation.end)),
                    )
                })
                .collect(),
        }
    }

    /// Rebuilds a ledger from its persisted form.
    ///
    /// Entries whose key or end time cannot be parsed are dropped, and an
    /// owner listed more than once keeps only their earliest slot.
    pub fn from_snapshot(snapshot: &LedgerSnapshot, owners: &HashMap<UserId, ChatUser>) -> Self {
        let mut ledger = Self::new();

        for (raw_key, slot) in &snapshot.entries {
            let Ok(key) = raw_key.parse::<SlotKey>() else {
                warn!(
                    event_name = "ledger.restore.invalid_key",
                    slot = %raw_key,
                    "skipping persisted reservation with unparseable key"
                );
                continue;
            };
            let Some(end) = parse_slot_time(slot.end()) else {
                warn!(
                    event_name = "ledger.restore.invalid_end",
                    slot = %raw_key,
                    end = %slot.end(),
                    "skipping persisted reservation with unparseable end time"
                );
                continue;
            };

            let owner_id = slot.owner_id();
            let reservation =
                Reservation { key, owner_id, owner: owners.get(&owner_id).cloned(), end };
            if let Err(error) = ledger.reinstate(reservation) {
                warn!(
                    event_name = "ledger.restore.conflict",
                    slot = %raw_key,
                    user_id = %owner_id,
                    error = %error,
                    "skipping persisted reservation that breaks ledger invariants"
                );
            }
        }

        ledger
    }

    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.reservations.len() != self.active_by_user.len() {
            return Err(DomainError::InvariantViolation(format!(
                "{} reservations but {} active users",
                self.reservations.len(),
                self.active_by_user.len()
            )));
        }

        for (user, start) in &self.active_by_user {
            match self.reservations.get(&SlotKey::new(*start)) {
                Some(reservation) if reservation.owner_id == *user => {}
                _ => {
                    return Err(DomainError::InvariantViolation(format!(
                        "user {user} points at {} which they do not own",
                        format_slot_time(*start)
                    )))
                }
            }
        }

        Ok(())
    }

    fn insert(&mut self, reservation: Reservation) {
        self.active_by_user.insert(reservation.owner_id, reservation.start());
        self.reservations.insert(reservation.key, reservation);
    }
}
