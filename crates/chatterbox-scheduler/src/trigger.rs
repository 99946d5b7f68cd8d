//! Trigger capability: when a task fires.

use std::collections::BTreeMap;

use chatterbox_core::error::{BotError, Result};
use serde_json::Value;

use crate::context::TaskContext;
use crate::interval::Callback;
use crate::repeat::RepeatTrigger;

/// A kind of trigger. Each instance is handed the action callback with
/// `on_trigger` before anything that schedules it.
pub trait Trigger: Send {
    /// Tag stored in `tasks.trigger_type`.
    fn kind(&self) -> &'static str;

    fn on_trigger(&mut self, callback: Callback);

    /// Validate `spec`, persist a row and start firing. Returns the row id.
    fn create(&mut self, spec: &Value) -> Result<i64>;

    /// Re-arm a persisted trigger. At startup it must not be armed yet,
    /// otherwise it must be.
    fn restart(&mut self, id: i64, startup: bool) -> Result<()>;

    fn update(&mut self, id: i64, spec: &Value) -> Result<()>;

    fn delete(&mut self, id: i64) -> Result<()>;

    /// Drop whatever is left of `id` whether or not it is armed. A missing
    /// row is not an error.
    fn discard(&mut self, id: i64) -> Result<()>;

    /// Ids of every persisted row of this kind.
    fn ids(&self) -> Result<Vec<i64>>;
}

pub type TriggerBuilder = fn(&TaskContext) -> Result<Box<dyn Trigger>>;

/// Registration table from trigger tag to constructor.
#[derive(Clone, Default)]
pub struct TriggerKinds {
    builders: BTreeMap<String, TriggerBuilder>,
}

impl TriggerKinds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in kinds (`repeat`).
    pub fn with_defaults() -> Self {
        let mut kinds = Self::new();
        kinds.register(crate::repeat::KIND, RepeatTrigger::build);
        kinds
    }

    pub fn register(&mut self, kind: &str, builder: TriggerBuilder) {
        self.builders.insert(kind.to_string(), builder);
    }

    pub fn build(&self, kind: &str, ctx: &TaskContext) -> Result<Box<dyn Trigger>> {
        let builder = self
            .builders
            .get(kind)
            .ok_or_else(|| BotError::Validation(format!("unknown trigger type '{kind}'")))?;
        builder(ctx)
    }

    pub fn kinds(&self) -> Vec<String> {
        self.builders.keys().cloned().collect()
    }
}
