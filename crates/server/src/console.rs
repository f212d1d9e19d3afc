//! Line-based transport for running the bot from a terminal.
//!
//! Each input line is one message in the `console` channel. A line starting
//! with `@<id>` is sent as that user; anything else comes from the default
//! console user. Replies are written to the output, one per line block.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout,
};
use tokio::sync::Mutex;
use turnero_chat::events::{ChatEnvelope, ChatEvent, MessageEvent, ReadyEvent};
use turnero_chat::gateway::{ChatTransport, TransportError};
use turnero_chat::replies::OutgoingMessage;
use turnero_core::domain::user::{ChannelId, ChatUser, UserId};
use uuid::Uuid;

pub const CONSOLE_CHANNEL: &str = "console";
const BOT_USER_ID: u64 = 0;
const DEFAULT_USER_ID: u64 = 1;

pub struct ConsoleTransport<R, W> {
    input: Mutex<Lines<R>>,
    output: Mutex<W>,
    ready_sent: AtomicBool,
}

impl ConsoleTransport<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> ConsoleTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: Mutex::new(input.lines()),
            output: Mutex::new(output),
            ready_sent: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    fn into_output(self) -> W {
        self.output.into_inner()
    }
}

/// Console users are named from their id, so any id resolves.
fn console_user(id: u64) -> ChatUser {
    match id {
        BOT_USER_ID => ChatUser::new(id, "turnero"),
        DEFAULT_USER_ID => ChatUser::new(id, "consola"),
        _ => ChatUser::new(id, format!("usuario-{id}")),
    }
}

/// Splits an input line into its author and message text.
fn parse_line(line: &str) -> (ChatUser, String) {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix('@') {
        let (id, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if let Ok(id) = id.parse::<u64>() {
            return (console_user(id), text.trim().to_owned());
        }
    }
    (console_user(DEFAULT_USER_ID), trimmed.to_owned())
}

#[async_trait]
impl<R, W> ChatTransport for ConsoleTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        if !self.ready_sent.swap(true, Ordering::SeqCst) {
            return Ok(Some(ChatEnvelope {
                event_id: Uuid::new_v4().to_string(),
                event: ChatEvent::Ready(ReadyEvent { bot_user: console_user(BOT_USER_ID) }),
            }));
        }

        let mut input = self.input.lock().await;
        loop {
            let Some(line) = input
                .next_line()
                .await
                .map_err(|error| TransportError::Receive(error.to_string()))?
            else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }

            let (author, text) = parse_line(&line);
            let mentions_bot = text.contains(&console_user(BOT_USER_ID).mention());

            return Ok(Some(ChatEnvelope {
                event_id: Uuid::new_v4().to_string(),
                event: ChatEvent::Message(MessageEvent {
                    channel_id: ChannelId(CONSOLE_CHANNEL.to_owned()),
                    author,
                    text,
                    mentions_bot,
                    from_bot: false,
                }),
            }));
        }
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let rendered = format!("[#{}] {}\n", message.channel_id, message.text);
        let mut output = self.output.lock().await;
        output
            .write_all(rendered.as_bytes())
            .await
            .map_err(|error| TransportError::Send(error.to_string()))?;
        output.flush().await.map_err(|error| TransportError::Send(error.to_string()))
    }

    async fn resolve_user(&self, id: UserId) -> Result<Option<ChatUser>, TransportError> {
        Ok(Some(console_user(id.0)))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut output = self.output.lock().await;
        output.flush().await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}
