use serde::Serialize;
use turnero_core::domain::slot::SlotRequest;
use turnero_core::domain::user::{ChannelId, ChatUser};
use turnero_core::ledger::Reservation;
use turnero_core::ports::{ReminderNotice, ReminderNoticeKind};
use turnero_core::InterfaceError;

/// Plain text addressed to one channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub channel_id: ChannelId,
    pub text: String,
}

impl OutgoingMessage {
    pub fn new(channel_id: ChannelId, text: impl Into<String>) -> Self {
        Self { channel_id, text: text.into() }
    }
}

/// Line-oriented text builder for multi-line replies.
#[derive(Default)]
pub struct MessageBuilder {
    lines: Vec<String>,
}

impl MessageBuilder {
    pub fn new(header: impl Into<String>) -> Self {
        Self { lines: vec![header.into()] }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn lines<I, L>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.lines.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn blank(self) -> Self {
        self.line("")
    }

    pub fn build(self) -> String {
        self.lines.join("\n")
    }
}

pub fn reservation_confirmed(user: &ChatUser, request: &SlotRequest) -> String {
    format!(
        "✅ {}, tu reserva ha sido confirmada para el día {} a las {}.",
        user.mention(),
        request.day,
        request.time
    )
}

pub fn reservation_in_past(user: &ChatUser) -> String {
    format!("{}, no puedes reservar en el pasado.", user.mention())
}

pub fn already_booked(user: &ChatUser, existing: chrono::NaiveDateTime) -> String {
    format!("{}, ya tienes una reserva para el {}.", user.mention(), existing.format("%d/%H:%M"))
}

pub fn slot_taken(user: &ChatUser, request: &SlotRequest) -> String {
    format!(
        "{}, ya hay una reserva a las {} el día {}. Intenta con otra hora.",
        user.mention(),
        request.time,
        request.day
    )
}

pub fn invalid_format(user: &ChatUser, prefix: &str) -> String {
    format!("{}, el formato es incorrecto. Usa: `{prefix}reservar DD/HH:MM`.", user.mention())
}

pub fn reservation_released(user: &ChatUser, reservation: &Reservation) -> String {
    format!("✅ {}, tu turno para el {} ha sido liberado.", user.mention(), reservation.key)
}

pub fn nothing_to_release(user: &ChatUser) -> String {
    format!("{}, no tienes ninguna reserva activa para liberar.", user.mention())
}

pub fn reservation_list(reservations: &[Reservation]) -> String {
    if reservations.is_empty() {
        return "📭 No hay reservas activas.".to_owned();
    }

    MessageBuilder::new("📅 **Reservas programadas:**")
        .lines(reservations.iter().map(|reservation| {
            format!(
                "🔹 {} - {} → hasta {}",
                owner_label(reservation),
                reservation.key,
                reservation.end.format("%H:%M")
            )
        }))
        .build()
}

pub fn help_message(prefix: &str) -> String {
    MessageBuilder::new("**📖 Comandos del bot de turnos:**")
        .line(format!(
            "🔹 {prefix}reservar DD/HH:MM - Reserva un turno en una fecha y hora específica."
        ))
        .line(format!("🔹 {prefix}turnos - Muestra la lista de reservas programadas."))
        .line(format!("🔹 {prefix}liberar - Libera tu turno si ya no lo necesitas."))
        .line(format!("🔹 {prefix}ayuda - Muestra esta ayuda."))
        .blank()
        .line("**📜 Reglas del sistema de turnos:**")
        .line("✅ Solo puedes tener **una reserva activa** a la vez.")
        .line("✅ Cada turno dura **1 hora automáticamente**.")
        .line("✅ Cuando un turno comienza, se **libera automáticamente**.")
        .line(format!("📌 *Ejemplo:* {prefix}reservar 12/15:00"))
        .build()
}

pub fn reminder_text(notice: &ReminderNotice) -> String {
    let mention =
        notice.owner.as_ref().map(ChatUser::mention).unwrap_or_else(|| unknown_owner(notice));
    match notice.kind {
        ReminderNoticeKind::StartingSoon { minutes } => {
            format!("⏳ {mention}, tu turno comienza en {minutes} minutos.")
        }
        ReminderNoticeKind::Started => format!("⏳ {mention}, tu turno ha comenzado."),
    }
}

pub fn failure_message(user: &ChatUser, error: &InterfaceError) -> String {
    format!("{}, {} (ref: {})", user.mention(), error.user_message(), error.correlation_id())
}

fn owner_label(reservation: &Reservation) -> String {
    reservation
        .owner_mention()
        .unwrap_or_else(|| format!("usuario desconocido ({})", reservation.owner_id))
}

fn unknown_owner(notice: &ReminderNotice) -> String {
    format!("usuario desconocido ({})", notice.owner_id)
}
