use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use turnero_core::domain::user::{ChannelId, ChatUser, UserId};
use turnero_core::ports::UserDirectory;
use turnero_core::ReservationService;

use crate::commands::{
    normalize_message, CommandRouter, LedgerCommandService, ReservationCommandService,
};
use crate::replies::OutgoingMessage;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub event_id: String,
    pub event: ChatEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Ready(ReadyEvent),
    Message(MessageEvent),
    Unsupported { event_type: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::Ready(_) => ChatEventType::Ready,
            Self::Message(_) => ChatEventType::Message,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    Ready,
    Message,
    Unsupported,
}

/// The transport finished connecting and knows who the bot is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadyEvent {
    pub bot_user: ChatUser,
}

/// The bot's own user id, learned from the first ready event and shared by
/// the handlers of one dispatcher.
#[derive(Clone, Debug, Default)]
pub struct BotIdentity(Arc<OnceLock<UserId>>);

impl BotIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, bot_user: &ChatUser) {
        let _ = self.0.set(bot_user.id);
    }

    pub fn id(&self) -> Option<UserId> {
        self.0.get().copied()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel_id: ChannelId,
    pub author: ChatUser,
    pub text: String,
    pub mentions_bot: bool,
    pub from_bot: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutgoingMessage),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("ledger restore failed: {0}")]
    Restore(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChatEventType;
    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Dispatcher wired to the reservation service: ready events restore the
/// ledger, messages run commands.
pub fn reservation_dispatcher(
    service: ReservationService,
    directory: Arc<dyn UserDirectory>,
    prefix: &str,
) -> EventDispatcher {
    let identity = BotIdentity::new();
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(ReadyHandler::new(service.clone(), directory, identity.clone()));
    dispatcher.register(MessageCommandHandler::new(
        LedgerCommandService::new(service, prefix),
        prefix,
        identity,
    ));
    dispatcher
}

pub struct MessageCommandHandler<S> {
    router: CommandRouter<S>,
    identity: BotIdentity,
}

impl<S> MessageCommandHandler<S>
where
    S: ReservationCommandService,
{
    pub fn new(service: S, prefix: impl Into<String>, identity: BotIdentity) -> Self {
        Self { router: CommandRouter::new(service, prefix), identity }
    }
}

#[async_trait]
impl<S> EventHandler for MessageCommandHandler<S>
where
    S: ReservationCommandService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Message
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Message(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if event.from_bot {
            return Ok(HandlerResult::Ignored);
        }

        let Some(invocation) = normalize_message(
            event,
            self.router.prefix(),
            self.identity.id(),
            &ctx.correlation_id,
        ) else {
            return Ok(HandlerResult::Ignored);
        };

        debug!(
            event_name = "commands.received",
            correlation_id = %ctx.correlation_id,
            user_id = %invocation.author.id,
            command = %invocation.name,
            "command received"
        );

        Ok(match self.router.route(&invocation).await {
            Some(message) => HandlerResult::Responded(message),
            None => HandlerResult::Processed,
        })
    }
}

pub struct ReadyHandler {
    service: ReservationService,
    directory: Arc<dyn UserDirectory>,
    identity: BotIdentity,
}

impl ReadyHandler {
    pub fn new(
        service: ReservationService,
        directory: Arc<dyn UserDirectory>,
        identity: BotIdentity,
    ) -> Self {
        Self { service, directory, identity }
    }
}

#[async_trait]
impl EventHandler for ReadyHandler {
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Ready
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Ready(ready) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        info!(
            event_name = "gateway.ready",
            correlation_id = %ctx.correlation_id,
            bot_user = %ready.bot_user.name,
            "bot online"
        );
        self.identity.remember(&ready.bot_user);

        match self.service.restore(self.directory.as_ref()).await {
            Ok(count) => {
                info!(
                    event_name = "gateway.ready.restored",
                    correlation_id = %ctx.correlation_id,
                    reservations = count,
                    "reservations loaded"
                );
                Ok(HandlerResult::Processed)
            }
            Err(error) => {
                warn!(
                    event_name = "gateway.ready.restore_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %error,
                    "could not load persisted reservations"
                );
                Err(EventHandlerError::Restore(error.to_string()))
            }
        }
    }
}
