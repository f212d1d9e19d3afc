pub mod config;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod persistence;
pub mod ports;
pub mod reminders;
pub mod service;

pub use config::{AppConfig, ConfigError, LoadOptions, TransportMode};
pub use domain::slot::{SlotKey, SlotRequest};
pub use domain::user::{ChannelId, ChatUser, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use ledger::{Reservation, ReservationLedger};
pub use persistence::{LedgerSnapshot, PersistedSlot, ReservationStore, StoreError};
pub use ports::{Clock, Notifier, ReminderNotice, ReminderNoticeKind, SystemClock, UserDirectory};
pub use reminders::ReminderSettings;
pub use service::ReservationService;
