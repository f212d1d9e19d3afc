use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};

use crate::domain::slot::SlotKey;
use crate::domain::user::{ChannelId, ChatUser, UserId};
use crate::errors::ApplicationError;

/// Wall-clock source. Times are local and carry no timezone.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut current) = self.now.lock() {
            *current = now;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReminderNoticeKind {
    StartingSoon { minutes: i64 },
    Started,
}

/// Something the reminder task wants said in the booking's channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReminderNotice {
    pub kind: ReminderNoticeKind,
    pub key: SlotKey,
    pub owner_id: UserId,
    pub owner: Option<ChatUser>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        channel: &ChannelId,
        notice: &ReminderNotice,
    ) -> Result<(), ApplicationError>;
}

#[derive(Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(
        &self,
        _channel: &ChannelId,
        _notice: &ReminderNotice,
    ) -> Result<(), ApplicationError> {
        Ok(())
    }
}

/// Resolves persisted numeric ids back into addressable users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve(&self, id: UserId) -> Option<ChatUser>;
}

/// Directory backed by a fixed set of known users.
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
    users: HashMap<UserId, ChatUser>,
}

impl StaticUserDirectory {
    pub fn new(users: impl IntoIterator<Item = ChatUser>) -> Self {
        Self { users: users.into_iter().map(|user| (user.id, user)).collect() }
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn resolve(&self, id: UserId) -> Option<ChatUser> {
        self.users.get(&id).cloned()
    }
}
