//! One dispatcher per channel username, created lazily.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use chatterbox_core::config::DispatchConfig;
use chatterbox_core::error::{BotError, Result};
use chatterbox_core::traits::Transport;
use chatterbox_core::types::{IncomingMessage, normalize_channel};
use regex::Regex;

use crate::dispatcher::{ChannelDispatcher, DispatchSettings};

static CHANNEL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{4,25}$").unwrap());

/// Check a channel name (4–25 letters, digits or underscores).
pub fn validate_channel_name(channel: &str) -> Result<()> {
    if CHANNEL_NAME.is_match(channel) {
        Ok(())
    } else {
        Err(BotError::Validation(format!(
            "invalid channel name '{channel}': 4-25 letters, digits or underscores"
        )))
    }
}

struct RegistryInner {
    bot_username: String,
    transport: Arc<dyn Transport>,
    listener: Option<Arc<dyn Transport>>,
    settings: DispatchSettings,
    dispatchers: Mutex<HashMap<String, Arc<ChannelDispatcher>>>,
}

/// Process-wide set of channel dispatchers, passed explicitly to whoever needs it.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<RegistryInner>,
}

impl ChannelRegistry {
    pub fn new(
        bot_username: &str,
        transport: Arc<dyn Transport>,
        listener: Option<Arc<dyn Transport>>,
        config: &DispatchConfig,
    ) -> Result<Self> {
        Ok(Self::with_settings(
            bot_username,
            transport,
            listener,
            DispatchSettings::from_config(config)?,
        ))
    }

    pub fn with_settings(
        bot_username: &str,
        transport: Arc<dyn Transport>,
        listener: Option<Arc<dyn Transport>>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                bot_username: bot_username.to_lowercase(),
                transport,
                listener,
                settings,
                dispatchers: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn dispatchers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<ChannelDispatcher>>> {
        self.inner.dispatchers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The dispatcher for `channel`, created on first use.
    pub fn get_or_create(&self, channel: &str) -> Arc<ChannelDispatcher> {
        let channel = normalize_channel(channel);
        let mut dispatchers = self.dispatchers();
        dispatchers
            .entry(channel.clone())
            .or_insert_with(|| {
                tracing::info!("📡 Channel dispatcher created: #{channel}");
                ChannelDispatcher::new(
                    &channel,
                    self.inner.transport.clone(),
                    self.inner.listener.clone(),
                    self.inner.settings.clone(),
                )
            })
            .clone()
    }

    pub fn get(&self, channel: &str) -> Option<Arc<ChannelDispatcher>> {
        self.dispatchers().get(&normalize_channel(channel)).cloned()
    }

    /// Known channel usernames, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dispatchers().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.dispatchers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bot_username(&self) -> &str {
        &self.inner.bot_username
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.inner.transport.clone()
    }

    /// Route a message written by the bot to its channel's dispatcher for
    /// listener confirmation. Returns true when it confirmed a delivery.
    pub fn observe(&self, message: &IncomingMessage) -> bool {
        if message.username != self.inner.bot_username {
            return false;
        }
        self.get(&message.channel)
            .is_some_and(|dispatcher| dispatcher.observe(&message.content))
    }
}
