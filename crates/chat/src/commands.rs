use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use turnero_core::domain::slot::SlotRequest;
use turnero_core::domain::user::{ChannelId, ChatUser, UserId};
use turnero_core::{ApplicationError, DomainError, ReservationService};

use crate::events::MessageEvent;
use crate::replies::{self, OutgoingMessage};

/// A prefixed message broken into a command name and its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandInvocation {
    pub name: String,
    pub args: Vec<String>,
    pub author: ChatUser,
    pub channel_id: ChannelId,
    pub request_id: String,
}

impl CommandInvocation {
    pub fn reply(&self, text: impl Into<String>) -> OutgoingMessage {
        OutgoingMessage::new(self.channel_id.clone(), text)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReservationCommand {
    Reserve { slot: Option<String> },
    Release,
    List,
    Help,
    Unknown { name: String },
}

/// Turns a chat message into an invocation, or `None` when it is not
/// addressed to the bot.
///
/// A message is a command when it starts with `prefix`, or when it starts
/// with a mention of the bot. The mention is stripped and the prefix is then
/// optional. Until the bot's id is known only the prefix addresses it.
pub fn normalize_message(
    event: &MessageEvent,
    prefix: &str,
    bot_id: Option<UserId>,
    request_id: &str,
) -> Option<CommandInvocation> {
    let mut text = event.text.trim();
    let mut addressed = false;

    if let (true, Some(bot_id)) = (event.mentions_bot, bot_id) {
        if let Some(rest) = strip_bot_mention(text, bot_id) {
            text = rest.trim_start();
            addressed = true;
        }
    }

    if let Some(rest) = text.strip_prefix(prefix) {
        text = rest;
        addressed = true;
    }

    if !addressed {
        return None;
    }

    let mut parts = text.split_whitespace();
    let name = parts.next()?.to_lowercase();
    let args = parts.map(str::to_owned).collect();

    Some(CommandInvocation {
        name,
        args,
        author: event.author.clone(),
        channel_id: event.channel_id.clone(),
        request_id: request_id.to_owned(),
    })
}

pub fn classify_command(name: &str, args: &[String]) -> ReservationCommand {
    match name {
        "reservar" => ReservationCommand::Reserve { slot: args.first().cloned() },
        "liberar" => ReservationCommand::Release,
        "turnos" => ReservationCommand::List,
        "ayuda" => ReservationCommand::Help,
        other => ReservationCommand::Unknown { name: other.to_owned() },
    }
}

/// `<@id>` or `<@!id>` of the bot at the start of `text`. Mentions of other
/// users are left alone.
fn strip_bot_mention(text: &str, bot_id: UserId) -> Option<&str> {
    let rest = text.strip_prefix("<@")?;
    let rest = rest.strip_prefix('!').unwrap_or(rest);
    let (digits, tail) = rest.split_once('>')?;
    if !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    (digits.parse::<u64>().ok() == Some(bot_id.0)).then_some(tail)
}

pub struct CommandRouter<S> {
    service: S,
    prefix: String,
}

impl<S> CommandRouter<S>
where
    S: ReservationCommandService,
{
    pub fn new(service: S, prefix: impl Into<String>) -> Self {
        Self { service, prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Runs one invocation. Unknown commands produce no reply.
    pub async fn route(
        &self,
        invocation: &CommandInvocation,
    ) -> Option<OutgoingMessage> {
        let text = match classify_command(&invocation.name, &invocation.args) {
            ReservationCommand::Reserve { slot } => {
                self.service.reserve(slot, invocation).await
            }
            ReservationCommand::Release => self.service.release(invocation).await,
            ReservationCommand::List => self.service.list(invocation).await,
            ReservationCommand::Help => {
                info!(
                    event_name = "commands.help",
                    correlation_id = %invocation.request_id,
                    user_id = %invocation.author.id,
                    "help requested"
                );
                replies::help_message(&self.prefix)
            }
            ReservationCommand::Unknown { name } => {
                debug!(
                    event_name = "commands.unknown",
                    correlation_id = %invocation.request_id,
                    command = %name,
                    "ignoring unknown command"
                );
                return None;
            }
        };

        Some(invocation.reply(text))
    }
}

#[async_trait]
pub trait ReservationCommandService: Send + Sync {
    async fn reserve(
        &self,
        slot: Option<String>,
        invocation: &CommandInvocation,
    ) -> String;

    async fn release(&self, invocation: &CommandInvocation) -> String;

    async fn list(&self, invocation: &CommandInvocation) -> String;
}

/// Command service backed by the reservation ledger. Every outcome,
/// including rejections and storage failures, becomes a reply.
pub struct LedgerCommandService {
    service: ReservationService,
    prefix: String,
}

impl LedgerCommandService {
    pub fn new(service: ReservationService, prefix: impl Into<String>) -> Self {
        Self { service, prefix: prefix.into() }
    }

    fn rejection(
        &self,
        error: ApplicationError,
        request: Option<&SlotRequest>,
        invocation: &CommandInvocation,
    ) -> String {
        let author = &invocation.author;
        match (&error, request) {
            (ApplicationError::Domain(DomainError::InvalidFormat { input }), _) => {
                warn!(
                    event_name = "commands.reserve.invalid_format",
                    correlation_id = %invocation.request_id,
                    user_id = %author.id,
                    input = %input,
                    "reservation request is not DD/HH:MM"
                );
                replies::invalid_format(author, &self.prefix)
            }
            (ApplicationError::Domain(DomainError::InPast { requested }), _) => {
                warn!(
                    event_name = "commands.reserve.in_past",
                    correlation_id = %invocation.request_id,
                    user_id = %author.id,
                    requested = %requested,
                    "reservation request is in the past"
                );
                replies::reservation_in_past(author)
            }
            (ApplicationError::Domain(DomainError::UserAlreadyBooked { existing }), _) => {
                warn!(
                    event_name = "commands.reserve.already_booked",
                    correlation_id = %invocation.request_id,
                    user_id = %author.id,
                    existing = %existing,
                    "user already holds a reservation"
                );
                replies::already_booked(author, *existing)
            }
            (ApplicationError::Domain(DomainError::SlotTaken { key }), Some(request)) => {
                warn!(
                    event_name = "commands.reserve.slot_taken",
                    correlation_id = %invocation.request_id,
                    user_id = %author.id,
                    slot = %key,
                    "slot already reserved"
                );
                replies::slot_taken(author, request)
            }
            _ => self.failure(error, invocation),
        }
    }

    fn failure(&self, error: ApplicationError, invocation: &CommandInvocation) -> String {
        error!(
            event_name = "commands.failed",
            correlation_id = %invocation.request_id,
            user_id = %invocation.author.id,
            command = %invocation.name,
            error = %error,
            "command could not be completed"
        );
        let interface = error.into_interface(invocation.request_id.clone());
        replies::failure_message(&invocation.author, &interface)
    }
}

#[async_trait]
impl ReservationCommandService for LedgerCommandService {
    async fn reserve(
        &self,
        slot: Option<String>,
        invocation: &CommandInvocation,
    ) -> String {
        let raw = slot.unwrap_or_default();
        let request = match SlotRequest::parse(&raw) {
            Ok(request) => request,
            Err(error) => return self.rejection(error.into(), None, invocation),
        };

        match self.service.reserve(&invocation.author, &invocation.channel_id, &request).await {
            Ok(reservation) => {
                info!(
                    event_name = "commands.reserve.confirmed",
                    correlation_id = %invocation.request_id,
                    user_id = %invocation.author.id,
                    slot = %reservation.key,
                    "reservation confirmed"
                );
                replies::reservation_confirmed(&invocation.author, &request)
            }
            Err(error) => self.rejection(error, Some(&request), invocation),
        }
    }

    async fn release(&self, invocation: &CommandInvocation) -> String {
        match self.service.release(invocation.author.id).await {
            Ok(Some(reservation)) => {
                info!(
                    event_name = "commands.release.completed",
                    correlation_id = %invocation.request_id,
                    user_id = %invocation.author.id,
                    slot = %reservation.key,
                    "reservation released"
                );
                replies::reservation_released(&invocation.author, &reservation)
            }
            Ok(None) => {
                info!(
                    event_name = "commands.release.nothing_active",
                    correlation_id = %invocation.request_id,
                    user_id = %invocation.author.id,
                    "no reservation to release"
                );
                replies::nothing_to_release(&invocation.author)
            }
            Err(error) => self.failure(error, invocation),
        }
    }

    async fn list(&self, invocation: &CommandInvocation) -> String {
        let reservations = self.service.list_active().await;
        info!(
            event_name = "commands.list",
            correlation_id = %invocation.request_id,
            user_id = %invocation.author.id,
            reservations = reservations.len(),
            "reservation list requested"
        );
        replies::reservation_list(&reservations)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;
    use turnero_core::domain::user::{ChannelId, ChatUser, UserId};
    use turnero_core::persistence::InMemoryReservationStore;
    use turnero_core::ports::{FixedClock, NoopNotifier};
    use turnero_core::{ReminderSettings, ReservationService};

    use super::{
        classify_command, normalize_message, CommandInvocation, CommandRouter, LedgerCommandService, ReservationCommand, ReservationCommandService,
    };
    use crate::events::MessageEvent;

    fn message(text: &str, mentions_bot: bool) -> MessageEvent {
        MessageEvent {
            channel_id: ChannelId("general".to_owned()),
            author: ChatUser::new(1, "ana"),
            text: text.to_owned(),
            mentions_bot,
            from_bot: false,
        }
    }

    fn invocation(author: ChatUser, name: &str, args: &[&str]) -> CommandInvocation {
        CommandInvocation {
            name: name.to_owned(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            author,
            channel_id: ChannelId("general".to_owned()),
            request_id: format!("req-{name}"),
        }
    }

    fn ledger_router(store: Arc<InMemoryReservationStore>) -> CommandRouter<LedgerCommandService> {
        let now = NaiveDate::from_ymd_opt(2025, 3, 10)
            .and_then(|date| date.and_hms_opt(9, 0, 0))
            .expect("valid fixture date");
        let service = ReservationService::new(
            store,
            Arc::new(FixedClock::new(now)),
            Arc::new(NoopNotifier),
            ReminderSettings::default(),
        );
        CommandRouter::new(LedgerCommandService::new(service, "!"), "!")
    }

    async fn reply_text(
        router: &CommandRouter<LedgerCommandService>,
        invocation: &CommandInvocation,
    ) -> String {
        router.route(invocation).await.expect("reply").text
    }

    const BOT: Option<UserId> = Some(UserId(99));

    #[test]
    fn prefixed_message_becomes_invocation() {
        let invocation = normalize_message(&message("!Reservar 12/15:00", false), "!", BOT, "evt-1")
            .expect("command");

        assert_eq!(invocation.name, "reservar");
        assert_eq!(invocation.args, vec!["12/15:00"]);
        assert_eq!(invocation.request_id, "evt-1");
        assert_eq!(invocation.author.id, UserId(1));
    }

    #[test]
    fn leading_bot_mention_is_stripped() {
        let with_prefix =
            normalize_message(&message("<@99> !turnos", true), "!", BOT, "evt-2").expect("command");
        let without_prefix = normalize_message(&message("<@!99>   liberar", true), "!", BOT, "evt-3")
            .expect("command");

        assert_eq!(with_prefix.name, "turnos");
        assert_eq!(without_prefix.name, "liberar");
    }

    #[test]
    fn mentions_of_other_users_do_not_address_the_bot() {
        let other = message("<@55> liberar, gracias <@99>", true);

        assert_eq!(normalize_message(&other, "!", BOT, "evt-7"), None);
        assert_eq!(normalize_message(&message("<@99> liberar", true), "!", None, "evt-8"), None);
        assert_eq!(
            normalize_message(&message("<@55> !turnos", true), "!", BOT, "evt-9"),
            None,
            "the prefix must open the message"
        );
    }

    #[test]
    fn plain_chatter_is_not_a_command() {
        assert_eq!(normalize_message(&message("hola a todos", false), "!", BOT, "evt-4"), None);
        assert_eq!(normalize_message(&message("<@99> turnos", false), "!", BOT, "evt-5"), None);
        assert_eq!(normalize_message(&message("!", false), "!", BOT, "evt-6"), None);
    }

    #[test]
    fn classify_maps_known_names() {
        assert_eq!(
            classify_command("reservar", &[]),
            ReservationCommand::Reserve { slot: None }
        );
        assert_eq!(classify_command("liberar", &[]), ReservationCommand::Release);
        assert_eq!(classify_command("turnos", &[]), ReservationCommand::List);
        assert_eq!(classify_command("ayuda", &[]), ReservationCommand::Help);
        assert_eq!(
            classify_command("bailar", &[]),
            ReservationCommand::Unknown { name: "bailar".to_owned() }
        );
    }

    #[tokio::test]
    async fn router_calls_service_entrypoints() {
        #[derive(Default)]
        struct RecordingService {
            calls: Mutex<Vec<&'static str>>,
        }

        #[async_trait::async_trait]
        impl ReservationCommandService for RecordingService {
            async fn reserve(
                &self,
                _slot: Option<String>,
                _invocation: &CommandInvocation,
            ) -> String {
                self.calls.lock().expect("lock").push("reserve");
                "reserved".to_owned()
            }

            async fn release(&self, _invocation: &CommandInvocation) -> String {
                self.calls.lock().expect("lock").push("release");
                "released".to_owned()
            }

            async fn list(&self, _invocation: &CommandInvocation) -> String {
                self.calls.lock().expect("lock").push("list");
                "listed".to_owned()
            }
        }

        let router = CommandRouter::new(RecordingService::default(), "!");
        let ana = ChatUser::new(1, "ana");
        for name in ["reservar", "liberar", "turnos", "ayuda"] {
            let reply = router.route(&invocation(ana.clone(), name, &[])).await;
            assert!(reply.is_some(), "{name} should reply");
        }
        let unknown = router.route(&invocation(ana, "bailar", &[])).await;

        assert_eq!(unknown, None);
        let calls = router.service.calls.lock().expect("lock");
        assert_eq!(&*calls, &["reserve", "release", "list"]);
    }

    #[tokio::test]
    async fn reserve_list_release_flow_replies_in_spanish() {
        let store = Arc::new(InMemoryReservationStore::new());
        let router = ledger_router(store.clone());
        let ana = ChatUser::new(1, "ana");

        assert_eq!(
            reply_text(&router, &invocation(ana.clone(), "reservar", &["12/15:00"])).await,
            "✅ <@1>, tu reserva ha sido confirmada para el día 12 a las 15:00."
        );
        assert_eq!(
            reply_text(&router, &invocation(ana.clone(), "turnos", &[])).await,
            "📅 **Reservas programadas:**\n🔹 <@1> - 2025-03-12 15:00 → hasta 16:00"
        );
        assert_eq!(
            reply_text(&router, &invocation(ana.clone(), "liberar", &[])).await,
            "✅ <@1>, tu turno para el 2025-03-12 15:00 ha sido liberado."
        );
        assert_eq!(
            reply_text(&router, &invocation(ana, "liberar", &[])).await,
            "<@1>, no tienes ninguna reserva activa para liberar."
        );
        assert!(store.current().is_empty());
    }

    #[tokio::test]
    async fn rejections_map_to_their_replies() {
        let router = ledger_router(Arc::new(InMemoryReservationStore::new()));
        let ana = ChatUser::new(1, "ana");
        let bruno = ChatUser::new(2, "bruno");

        assert_eq!(
            reply_text(&router, &invocation(ana.clone(), "reservar", &["05/09:00"])).await,
            "<@1>, no puedes reservar en el pasado."
        );

        reply_text(&router, &invocation(ana.clone(), "reservar", &["11/09:00"])).await;
        assert_eq!(
            reply_text(&router, &invocation(ana, "reservar", &["12/10:00"])).await,
            "<@1>, ya tienes una reserva para el 11/09:00."
        );
        assert_eq!(
            reply_text(&router, &invocation(bruno.clone(), "reservar", &["11/9:00"])).await,
            "<@2>, ya hay una reserva a las 9:00 el día 11. Intenta con otra hora."
        );
        assert_eq!(
            reply_text(&router, &invocation(bruno.clone(), "reservar", &[])).await,
            "<@2>, el formato es incorrecto. Usa: `!reservar DD/HH:MM`."
        );
        assert_eq!(
            reply_text(&router, &invocation(bruno, "reservar", &["32/10:00"])).await,
            "<@2>, el formato es incorrecto. Usa: `!reservar DD/HH:MM`."
        );
    }

    #[tokio::test]
    async fn storage_failure_replies_with_reference() {
        let store = Arc::new(InMemoryReservationStore::new());
        store.fail_saves(true);
        let router = ledger_router(store);

        let text =
            reply_text(&router, &invocation(ChatUser::new(1, "ana"), "reservar", &["12/15:00"]))
                .await;

        assert!(text.starts_with("<@1>, No se pudieron guardar las reservas."));
        assert!(text.contains("req-reservar"));
    }
}
