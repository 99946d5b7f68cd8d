//! Console transport — chat over stdin/stdout.
//!
//! Input lines are `<channel> <user> <text...>`. Everything the bot says is
//! printed and also echoed back into the event stream as a message from the
//! bot itself, so listener confirmation works locally.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chatterbox_core::error::{BotError, Result};
use chatterbox_core::traits::Transport;
use chatterbox_core::types::{ChatEvent, IncomingMessage, normalize_channel};
use futures::stream::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub struct ConsoleTransport {
    username: String,
    connected: AtomicBool,
    channels: Mutex<Vec<String>>,
    tx: mpsc::UnboundedSender<ChatEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<ChatEvent>>>,
}

impl ConsoleTransport {
    pub fn new(username: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            username: username.to_lowercase(),
            connected: AtomicBool::new(false),
            channels: Mutex::new(Vec::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    fn emit(&self, event: ChatEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("console transport: no listener");
        }
    }
}

/// Parse `<channel> <user> <text...>`.
pub fn parse_line(line: &str) -> Option<IncomingMessage> {
    let mut parts = line.trim().splitn(3, char::is_whitespace);
    let channel = parts.next().filter(|c| !c.is_empty())?;
    let user = parts.next().filter(|u| !u.is_empty())?;
    let text = parts.next().map(str::trim).filter(|t| !t.is_empty())?;
    Some(IncomingMessage::new(channel, user, text))
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn connect(&self) -> Result<(String, u16)> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(("stdio".into(), 0));
        }

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            tracing::info!("Console input loop started");
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_line(&line) {
                        Some(msg) => {
                            if tx.send(ChatEvent::Message(msg)).is_err() {
                                return;
                            }
                        }
                        None => eprintln!("expected: <channel> <user> <message>"),
                    },
                    Ok(None) => {
                        tracing::info!("Console input closed");
                        return;
                    }
                    Err(e) => {
                        tracing::error!("Console read error: {e}");
                        return;
                    }
                }
            }
        });

        self.emit(ChatEvent::Connected {
            address: "stdio".into(),
            port: 0,
        });
        Ok(("stdio".into(), 0))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn say(&self, channel: &str, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(BotError::RetryableSend("console not connected".into()));
        }
        let channel = normalize_channel(channel);
        println!("[#{channel}] {}: {text}", self.username);
        self.emit(ChatEvent::Message(IncomingMessage::new(&channel, &self.username, text)));
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<()> {
        let channel = normalize_channel(channel);
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if !channels.contains(&channel) {
            channels.push(channel.clone());
            self.emit(ChatEvent::Join {
                channel,
                username: self.username.clone(),
            });
        }
        Ok(())
    }

    fn channels(&self) -> Vec<String> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn listen(&self) -> Result<Box<dyn Stream<Item = ChatEvent> + Send + Unpin>> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| BotError::Transport("console is already being listened to".into()))?;
        Ok(Box::new(UnboundedReceiverStream::new(rx)))
    }
}
