//! Echo action — says a stored message in a stored channel.

use std::sync::Arc;

use chatterbox_channels::{ChannelRegistry, ResponseState, validate_channel_name};
use chatterbox_core::error::{BotError, Result};
use chatterbox_core::types::normalize_channel;
use rusqlite::types::ToSql;
use serde::Deserialize;
use serde_json::Value;

use crate::action::Action;
use crate::context::TaskContext;
use crate::interval::Callback;
use crate::persistence::{Record, Table};

pub const KIND: &str = "echo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoRow {
    pub id: i64,
    pub channel: String,
    pub message: String,
}

impl Record for EchoRow {
    type Key = i64;
    const TABLE: &'static str = "actions_echo";
    const KEY: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &["channel", "message"];
    const SCHEMA: &'static str = "CREATE TABLE IF NOT EXISTS actions_echo (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel TEXT NOT NULL,
            message TEXT NOT NULL
        )";

    fn key(&self) -> i64 {
        self.id
    }

    fn values(&self) -> Vec<&dyn ToSql> {
        vec![&self.channel, &self.message]
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            channel: row.get(1)?,
            message: row.get(2)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EchoSpec {
    channel: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct EchoPatch {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn clean_channel(channel: &str) -> Result<String> {
    let channel = channel.trim().trim_start_matches('#');
    validate_channel_name(channel)?;
    Ok(normalize_channel(channel))
}

fn clean_message(message: &str) -> Result<String> {
    let message = message.trim();
    if message.is_empty() {
        return Err(BotError::Validation("echo message must not be empty".into()));
    }
    Ok(message.to_string())
}

pub struct EchoAction {
    table: Table<EchoRow>,
    channels: ChannelRegistry,
}

impl EchoAction {
    pub fn new(ctx: &TaskContext) -> Result<Self> {
        Ok(Self {
            table: ctx.db.table()?,
            channels: ctx.channels.clone(),
        })
    }

    pub fn build(ctx: &TaskContext) -> Result<Box<dyn Action>> {
        Ok(Box::new(Self::new(ctx)?))
    }
}

impl Action for EchoAction {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn create(&self, spec: &Value) -> Result<i64> {
        let spec = EchoSpec::deserialize(spec).map_err(|e| {
            BotError::Validation(format!("echo action needs a channel and a message: {e}"))
        })?;
        let row = EchoRow {
            id: 0,
            channel: clean_channel(&spec.channel)?,
            message: clean_message(&spec.message)?,
        };
        self.table.insert_auto(&row)
    }

    fn to_execute(&self, id: i64) -> Result<Callback> {
        let row = self.table.require(&id)?;
        let dispatcher = self.channels.get_or_create(&row.channel);
        let request = format!("{KIND}:{id}");
        Ok(Arc::new(move || {
            tracing::debug!("📣 {request} firing in #{}", row.channel);
            dispatcher.enqueue(ResponseState::new(&request, &row.channel, &row.message));
        }))
    }

    fn update(&self, id: i64, spec: &Value) -> Result<()> {
        let patch = EchoPatch::deserialize(spec)
            .map_err(|e| BotError::Validation(format!("invalid echo update: {e}")))?;
        if patch.channel.is_none() && patch.message.is_none() {
            return Err(BotError::Validation(
                "echo update needs a channel or a message".into(),
            ));
        }

        let mut row = self.table.require(&id)?;
        if let Some(channel) = patch.channel {
            row.channel = clean_channel(&channel)?;
        }
        if let Some(message) = patch.message {
            row.message = clean_message(&message)?;
        }
        self.table.update(&row)
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.table.delete(&id)
    }

    fn ids(&self) -> Result<Vec<i64>> {
        self.table.keys()
    }
}
