//! Action capability: what a task does when it fires.

use std::collections::BTreeMap;

use chatterbox_core::error::{BotError, Result};
use serde_json::Value;

use crate::context::TaskContext;
use crate::echo::EchoAction;
use crate::interval::Callback;

pub trait Action: Send {
    /// Tag stored in `tasks.action_type`.
    fn kind(&self) -> &'static str;

    /// Validate `spec` and persist a row. Returns the row id.
    fn create(&self, spec: &Value) -> Result<i64>;

    /// Callback that performs the persisted action `id`.
    fn to_execute(&self, id: i64) -> Result<Callback>;

    /// Apply a partial update to the persisted row.
    fn update(&self, id: i64, spec: &Value) -> Result<()>;

    fn delete(&self, id: i64) -> Result<()>;

    fn ids(&self) -> Result<Vec<i64>>;
}

pub type ActionBuilder = fn(&TaskContext) -> Result<Box<dyn Action>>;

/// Registration table from action tag to constructor.
#[derive(Clone, Default)]
pub struct ActionKinds {
    builders: BTreeMap<String, ActionBuilder>,
}

impl ActionKinds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in kinds (`echo`).
    pub fn with_defaults() -> Self {
        let mut kinds = Self::new();
        kinds.register(crate::echo::KIND, EchoAction::build);
        kinds
    }

    pub fn register(&mut self, kind: &str, builder: ActionBuilder) {
        self.builders.insert(kind.to_string(), builder);
    }

    pub fn build(&self, kind: &str, ctx: &TaskContext) -> Result<Box<dyn Action>> {
        let builder = self
            .builders
            .get(kind)
            .ok_or_else(|| BotError::Validation(format!("unknown action type '{kind}'")))?;
        builder(ctx)
    }

    pub fn kinds(&self) -> Vec<String> {
        self.builders.keys().cloned().collect()
    }
}
