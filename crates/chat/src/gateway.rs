use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use turnero_core::domain::user::{ChannelId, ChatUser, UserId};
use turnero_core::ports::{Notifier, ReminderNotice, UserDirectory};
use turnero_core::ApplicationError;

use crate::events::{
    ChatEnvelope, ChatEvent, EventContext, EventDispatcher, HandlerResult, ReadyEvent,
};
use crate::replies::{self, OutgoingMessage};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("user lookup failed: {0}")]
    Lookup(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// A chat platform connection. `next_envelope` returning `Ok(None)` means the
/// stream ended normally.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError>;
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), TransportError>;
    async fn resolve_user(&self, id: UserId) -> Result<Option<ChatUser>, TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Transport with no chat platform behind it. It reports ready once, so the
/// ledger is restored and reminders run, then ends its stream.
#[derive(Default)]
pub struct NoopChatTransport {
    ready_sent: AtomicBool,
}

impl NoopChatTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatTransport for NoopChatTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        if self.ready_sent.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(ChatEnvelope {
            event_id: "noop-ready".to_owned(),
            event: ChatEvent::Ready(ReadyEvent { bot_user: ChatUser::new(0, "turnero") }),
        }))
    }

    async fn send_message(&self, _message: &OutgoingMessage) -> Result<(), TransportError> {
        Ok(())
    }

    async fn resolve_user(&self, _id: UserId) -> Result<Option<ChatUser>, TransportError> {
        Ok(None)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Sends reminder notices through the transport.
pub struct TransportNotifier {
    transport: Arc<dyn ChatTransport>,
}

impl TransportNotifier {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Notifier for TransportNotifier {
    async fn notify(
        &self,
        channel: &ChannelId,
        notice: &ReminderNotice,
    ) -> Result<(), ApplicationError> {
        let message = OutgoingMessage::new(channel.clone(), replies::reminder_text(notice));
        self.transport
            .send_message(&message)
            .await
            .map_err(|error| ApplicationError::Notification(error.to_string()))
    }
}

/// Resolves persisted owner ids with the transport's user lookup. Lookup
/// failures count as unknown users.
pub struct TransportDirectory {
    transport: Arc<dyn ChatTransport>,
}

impl TransportDirectory {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl UserDirectory for TransportDirectory {
    async fn resolve(&self, id: UserId) -> Option<ChatUser> {
        match self.transport.resolve_user(id).await {
            Ok(user) => user,
            Err(error) => {
                warn!(
                    event_name = "gateway.user_lookup_failed",
                    user_id = %id,
                    error = %error,
                    "could not resolve user"
                );
                None
            }
        }
    }
}

pub struct GatewayRunner {
    transport: Arc<dyn ChatTransport>,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
}

impl GatewayRunner {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    pub async fn start(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "chat transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "chat transport retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening chat transport connection");
        self.transport.connect().await?;
        info!(attempt, "chat transport connected");

        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(attempt, "chat transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };

            debug!(
                event_name = "ingress.chat.envelope_received",
                event_id = %envelope.event_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.event_id,
                user_id = author_id(&envelope).as_deref().unwrap_or("unknown"),
                "received chat envelope"
            );

            let context = EventContext { correlation_id: envelope.event_id.clone() };
            match self.dispatcher.dispatch(&envelope, &context).await {
                Ok(HandlerResult::Responded(message)) => self.deliver(&message, &context).await,
                Ok(HandlerResult::Processed | HandlerResult::Ignored) => {}
                Err(error) => {
                    warn!(
                        event_id = %envelope.event_id,
                        correlation_id = %envelope.event_id,
                        error = %error,
                        "event dispatch failed; continuing gateway loop"
                    );
                }
            }
        }
    }

    async fn deliver(&self, message: &OutgoingMessage, context: &EventContext) {
        if let Err(error) = self.transport.send_message(message).await {
            warn!(
                event_name = "egress.chat.send_failed",
                correlation_id = %context.correlation_id,
                channel_id = %message.channel_id,
                error = %error,
                "failed to send reply"
            );
        } else {
            debug!(
                event_name = "egress.chat.reply_sent",
                correlation_id = %context.correlation_id,
                channel_id = %message.channel_id,
                "reply sent"
            );
        }
    }
}

fn author_id(envelope: &ChatEnvelope) -> Option<String> {
    match &envelope.event {
        ChatEvent::Message(event) => Some(event.author.id.to_string()),
        ChatEvent::Ready(_) | ChatEvent::Unsupported { .. } => None,
    }
}
