//! Chat interface for the reservation bot.
//!
//! - **Gateway** (`gateway`) - transport trait, reconnecting event loop,
//!   and the notifier and user directory adapters the core depends on
//! - **Events** (`events`) - envelopes, handlers and the dispatcher
//! - **Commands** (`commands`) - `reservar`, `liberar`, `turnos`, `ayuda`
//! - **Replies** (`replies`) - every user-facing text
//!
//! ```text
//! ChatTransport → GatewayRunner → EventDispatcher → CommandRouter → ReservationService
//!                      ↑                                   │
//!                      └──────────── OutgoingMessage ──────┘
//! ```

pub mod commands;
pub mod events;
pub mod gateway;
pub mod replies;
