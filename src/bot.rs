//! Bot event loop — routes chat events to commands and the channel registry.

use std::sync::Arc;

use chatterbox_channels::{ChannelRegistry, ResponseState, validate_channel_name};
use chatterbox_core::config::BotConfig;
use chatterbox_core::error::Result;
use chatterbox_core::traits::Transport;
use chatterbox_core::types::{ChatEvent, IncomingMessage};
use chatterbox_scheduler::{Database, TaskContext, TaskRegistry};
use futures::StreamExt;

use crate::commands;

pub struct Bot {
    config: BotConfig,
    transport: Arc<dyn Transport>,
    channels: ChannelRegistry,
    tasks: TaskRegistry,
}

impl Bot {
    pub fn new(config: BotConfig, transport: Arc<dyn Transport>, db: Database) -> Result<Self> {
        let listener = config
            .dispatch
            .listener_confirm
            .then(|| transport.clone());
        let channels = ChannelRegistry::new(
            &config.username,
            transport.clone(),
            listener,
            &config.dispatch,
        )?;
        let tasks = TaskRegistry::new(TaskContext::new(db, channels.clone()))?;
        Ok(Self {
            config,
            transport,
            channels,
            tasks,
        })
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Connect, join the configured channels and re-arm stored tasks.
    /// Returns how many tasks were re-armed.
    pub async fn start(&self) -> Result<usize> {
        let (address, port) = self.transport.connect().await?;
        tracing::info!(
            "🔌 Connected via {} ({address}:{port})",
            self.transport.name()
        );

        for channel in &self.config.channels {
            if let Err(e) = validate_channel_name(channel) {
                tracing::warn!("⚠️ Skipping channel: {e}");
                continue;
            }
            self.transport.join(channel).await?;
            self.channels.get_or_create(channel);
        }

        self.tasks.init()
    }

    /// Process events until the transport's stream ends.
    pub async fn run(&self) -> Result<()> {
        let mut events = self.transport.listen().await?;
        while let Some(event) = events.next().await {
            self.handle_event(event)?;
        }
        tracing::info!("Event stream closed");
        Ok(())
    }

    pub fn handle_event(&self, event: ChatEvent) -> Result<()> {
        match event {
            ChatEvent::Connected { address, port } => {
                tracing::debug!("Transport connected at {address}:{port}");
            }
            ChatEvent::Join { channel, username } => {
                tracing::debug!("Joined #{channel} as {username}");
            }
            ChatEvent::Message(message) => {
                self.handle_message(&message)?;
            }
        }
        Ok(())
    }

    /// Handle one chat message. Returns the response enqueued, if any.
    ///
    /// Only fatal errors are returned; others become the response text.
    pub fn handle_message(&self, message: &IncomingMessage) -> Result<Option<String>> {
        if message.username == self.channels.bot_username() {
            self.channels.observe(message);
            return Ok(None);
        }
        let Some(body) = message.content.strip_prefix(self.config.prefix.as_str()) else {
            return Ok(None);
        };

        let tokens: Vec<&str> = body.split_whitespace().collect();
        let response = match commands::execute(&self.tasks, &tokens) {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!("Command failed in #{}: {e}", message.channel);
                Some(e.user_message())
            }
        };

        if let Some(text) = &response {
            tracing::debug!("💬 #{} {}: {}", message.channel, message.username, message.content);
            self.channels
                .get_or_create(&message.channel)
                .enqueue(ResponseState::new(&message.content, &message.channel, text));
        }
        Ok(response)
    }
}
