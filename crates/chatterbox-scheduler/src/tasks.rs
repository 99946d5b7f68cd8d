//! Task registry — named pairs of one trigger row and one action row.
//!
//! Writes span three tables without a transaction. `create` compensates
//! for its own failures, but a crash between steps can still leave rows
//! no task refers to; `orphans()` reports them.

use std::collections::HashSet;
use std::sync::LazyLock;

use chatterbox_core::error::{BotError, Result};
use regex::Regex;
use rusqlite::types::ToSql;
use serde_json::Value;

use crate::action::ActionKinds;
use crate::context::TaskContext;
use crate::persistence::{Record, Table};
use crate::trigger::TriggerKinds;

static TASK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,40}$").unwrap());

/// Check a task name (3–40 letters, digits, `_` or `-`).
pub fn validate_task_name(name: &str) -> Result<()> {
    if TASK_NAME.is_match(name) {
        Ok(())
    } else {
        Err(BotError::Validation(format!(
            "invalid task name '{name}': 3-40 letters, digits, '_' or '-'"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub name: String,
    pub trigger_type: String,
    pub action_type: String,
    pub trigger_id: i64,
    pub action_id: i64,
}

impl Record for TaskRow {
    type Key = String;
    const TABLE: &'static str = "tasks";
    const KEY: &'static str = "name";
    const COLUMNS: &'static [&'static str] =
        &["trigger_type", "action_type", "trigger_id", "action_id"];
    const SCHEMA: &'static str = "CREATE TABLE IF NOT EXISTS tasks (
            name TEXT PRIMARY KEY,
            trigger_type TEXT NOT NULL,
            action_type TEXT NOT NULL,
            trigger_id INTEGER NOT NULL,
            action_id INTEGER NOT NULL
        )";

    fn key(&self) -> String {
        self.name.clone()
    }

    fn values(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.trigger_type,
            &self.action_type,
            &self.trigger_id,
            &self.action_id,
        ]
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            trigger_type: row.get(1)?,
            action_type: row.get(2)?,
            trigger_id: row.get(3)?,
            action_id: row.get(4)?,
        })
    }
}

/// Trigger and action rows that no task refers to, as `(kind, id)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Orphans {
    pub triggers: Vec<(String, i64)>,
    pub actions: Vec<(String, i64)>,
}

impl Orphans {
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty() && self.actions.is_empty()
    }
}

pub struct TaskRegistry {
    ctx: TaskContext,
    tasks: Table<TaskRow>,
    triggers: TriggerKinds,
    actions: ActionKinds,
}

impl TaskRegistry {
    /// Registry with the built-in trigger and action kinds.
    pub fn new(ctx: TaskContext) -> Result<Self> {
        Self::with_kinds(ctx, TriggerKinds::with_defaults(), ActionKinds::with_defaults())
    }

    pub fn with_kinds(ctx: TaskContext, triggers: TriggerKinds, actions: ActionKinds) -> Result<Self> {
        Ok(Self {
            tasks: ctx.db.table()?,
            ctx,
            triggers,
            actions,
        })
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Create the action, wire its callback into a new trigger, then store
    /// the task.
    pub fn create(
        &self,
        name: &str,
        trigger_type: &str,
        trigger_spec: &Value,
        action_type: &str,
        action_spec: &Value,
    ) -> Result<TaskRow> {
        validate_task_name(name)?;
        if self.tasks.exists(&name.to_string())? {
            return Err(BotError::AlreadyExists(format!("task '{name}' already exists")));
        }
        let action = self.actions.build(action_type, &self.ctx)?;
        let mut trigger = self.triggers.build(trigger_type, &self.ctx)?;

        let action_id = action.create(action_spec)?;
        let compensate_action = |reason: &BotError| {
            tracing::debug!("Rolling back {action_type}:{action_id} after: {reason}");
            if let Err(e) = action.delete(action_id) {
                tracing::warn!("Failed to remove action {action_type}:{action_id}: {e}");
            }
        };

        let trigger_id = match action.to_execute(action_id).and_then(|callback| {
            trigger.on_trigger(callback);
            trigger.create(trigger_spec)
        }) {
            Ok(id) => id,
            Err(e) => {
                compensate_action(&e);
                return Err(e);
            }
        };

        let row = TaskRow {
            name: name.to_string(),
            trigger_type: trigger_type.to_string(),
            action_type: action_type.to_string(),
            trigger_id,
            action_id,
        };
        if let Err(e) = self.tasks.insert(&row) {
            if let Err(te) = trigger.delete(trigger_id) {
                tracing::warn!("Failed to remove trigger {trigger_type}:{trigger_id}: {te}");
            }
            compensate_action(&e);
            return Err(e);
        }

        tracing::info!(
            "📅 Task created: {name} ({trigger_type}:{trigger_id} → {action_type}:{action_id})"
        );
        Ok(row)
    }

    /// Delete the trigger (stops its job), the action, then the task row.
    pub fn remove(&self, name: &str) -> Result<()> {
        let row = self.get(name)?;
        let mut trigger = self.triggers.build(&row.trigger_type, &self.ctx)?;
        match trigger.delete(row.trigger_id) {
            Ok(()) => {}
            // Never armed (init skipped it) or already half removed.
            Err(BotError::NotFound(e)) => {
                tracing::warn!("⚠️ Task {name}: {e}, discarding trigger leftovers");
                trigger.discard(row.trigger_id)?;
            }
            Err(e) => return Err(e),
        }
        match self.actions.build(&row.action_type, &self.ctx)?.delete(row.action_id) {
            Ok(()) => {}
            Err(BotError::NotFound(e)) => {
                tracing::warn!("⚠️ Task {name}: action already gone ({e})");
            }
            Err(e) => return Err(e),
        }
        self.tasks.delete(&row.name)?;
        tracing::info!("🗑️ Task removed: {name}");
        Ok(())
    }

    pub fn update_name(&self, old: &str, new: &str) -> Result<()> {
        validate_task_name(new)?;
        if old == new {
            self.get(old)?;
            return Ok(());
        }
        self.tasks.rename(&old.to_string(), &new.to_string())?;
        tracing::info!("📅 Task renamed: {old} → {new}");
        Ok(())
    }

    /// Change when a task fires.
    pub fn update_trigger(&self, name: &str, spec: &Value) -> Result<()> {
        let row = self.get(name)?;
        let callback = self
            .actions
            .build(&row.action_type, &self.ctx)?
            .to_execute(row.action_id)?;
        let mut trigger = self.triggers.build(&row.trigger_type, &self.ctx)?;
        trigger.on_trigger(callback);
        trigger.update(row.trigger_id, spec)?;
        tracing::info!("📅 Task trigger updated: {name}");
        Ok(())
    }

    /// Change what a task does. The trigger is re-armed so later fires use
    /// the new data.
    pub fn update_action(&self, name: &str, spec: &Value) -> Result<()> {
        let row = self.get(name)?;
        let action = self.actions.build(&row.action_type, &self.ctx)?;
        action.update(row.action_id, spec)?;
        let callback = action.to_execute(row.action_id)?;
        let mut trigger = self.triggers.build(&row.trigger_type, &self.ctx)?;
        trigger.on_trigger(callback);
        trigger.restart(row.trigger_id, false)?;
        tracing::info!("📅 Task action updated: {name}");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<TaskRow> {
        self.tasks
            .get(&name.to_string())?
            .ok_or_else(|| BotError::NotFound(format!("task '{name}' does not exist")))
    }

    /// Every task, ordered by name.
    pub fn list(&self) -> Result<Vec<TaskRow>> {
        self.tasks.all()
    }

    /// Re-arm every stored task. Returns how many were armed.
    ///
    /// Fatal inconsistencies abort; any other per-task failure is logged and
    /// that task is skipped.
    pub fn init(&self) -> Result<usize> {
        let rows = self.tasks.all()?;
        let mut armed = 0;
        for row in &rows {
            match self.arm(row) {
                Ok(()) => armed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!("⚠️ Task {} not re-armed: {e}", row.name),
            }
        }
        tracing::info!("📅 Re-armed {armed}/{} tasks", rows.len());
        Ok(armed)
    }

    fn arm(&self, row: &TaskRow) -> Result<()> {
        let callback = self
            .actions
            .build(&row.action_type, &self.ctx)?
            .to_execute(row.action_id)?;
        let mut trigger = self.triggers.build(&row.trigger_type, &self.ctx)?;
        trigger.on_trigger(callback);
        trigger.restart(row.trigger_id, true)
    }

    /// Remove every task one by one. Returns how many were removed.
    ///
    /// A task that fails to go does not stop the rest; the failures are
    /// reported together once every task has been tried.
    pub fn clear(&self) -> Result<usize> {
        let names = self.tasks.keys()?;
        let mut removed = 0;
        let mut failed = Vec::new();
        for name in &names {
            match self.remove(name) {
                Ok(()) => removed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("⚠️ Task {name} not removed: {e}");
                    failed.push(format!("{name} ({e})"));
                }
            }
        }
        if !failed.is_empty() {
            return Err(BotError::Storage(format!(
                "removed {removed} tasks, could not remove {}",
                failed.join(", ")
            )));
        }
        Ok(removed)
    }

    /// Trigger and action rows of the registered kinds that no task uses.
    pub fn orphans(&self) -> Result<Orphans> {
        let rows = self.tasks.all()?;
        let used_triggers: HashSet<(&str, i64)> = rows
            .iter()
            .map(|r| (r.trigger_type.as_str(), r.trigger_id))
            .collect();
        let used_actions: HashSet<(&str, i64)> = rows
            .iter()
            .map(|r| (r.action_type.as_str(), r.action_id))
            .collect();

        let mut orphans = Orphans::default();
        for kind in self.triggers.kinds() {
            for id in self.triggers.build(&kind, &self.ctx)?.ids()? {
                if !used_triggers.contains(&(kind.as_str(), id)) {
                    orphans.triggers.push((kind.clone(), id));
                }
            }
        }
        for kind in self.actions.kinds() {
            for id in self.actions.build(&kind, &self.ctx)?.ids()? {
                if !used_actions.contains(&(kind.as_str(), id)) {
                    orphans.actions.push((kind.clone(), id));
                }
            }
        }
        Ok(orphans)
    }
}
