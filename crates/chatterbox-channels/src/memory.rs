//! In-memory transport that records sends and replays injected events.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chatterbox_core::error::{BotError, Result};
use chatterbox_core::traits::Transport;
use chatterbox_core::types::{ChatEvent, IncomingMessage, normalize_channel};
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Transport that keeps everything in memory.
///
/// `say` fails with a transport error while `fail_next` has budget left,
/// and with a retryable error while disconnected.
pub struct MemoryTransport {
    connected: AtomicBool,
    failures: AtomicU32,
    sent: Mutex<Vec<(String, String)>>,
    channels: Mutex<Vec<String>>,
    tx: mpsc::UnboundedSender<ChatEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<ChatEvent>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            connected: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// A transport that is already connected.
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.connected.store(true, Ordering::SeqCst);
        transport
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make the next `n` sends fail.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Every successful send as `(channel, text)`, oldest first.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Texts sent to one channel.
    pub fn sent_texts(&self, channel: &str) -> Vec<String> {
        let channel = normalize_channel(channel);
        self.sent()
            .into_iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, text)| text)
            .collect()
    }

    /// Inject an incoming event into the listen stream.
    pub fn push_event(&self, event: ChatEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("memory transport: listener dropped, event discarded");
        }
    }

    pub fn push_message(&self, channel: &str, username: &str, content: &str) {
        self.push_event(ChatEvent::Message(IncomingMessage::new(channel, username, content)));
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<(String, u16)> {
        self.connected.store(true, Ordering::SeqCst);
        let address = ("127.0.0.1".to_string(), 0);
        self.push_event(ChatEvent::Connected {
            address: address.0.clone(),
            port: address.1,
        });
        Ok(address)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn say(&self, channel: &str, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(BotError::RetryableSend("memory transport not connected".into()));
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BotError::Transport("simulated send failure".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((normalize_channel(channel), text.to_string()));
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<()> {
        let channel = normalize_channel(channel);
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if !channels.contains(&channel) {
            channels.push(channel.clone());
            self.push_event(ChatEvent::Join {
                channel,
                username: String::new(),
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
            .ok_or_else(|| BotError::Transport("memory transport is already being listened to".into()))?;
        Ok(Box::new(UnboundedReceiverStream::new(rx)))
    }
}
