//! # Chatterbox Scheduler
//!
//! Persisted automations: a task binds a unique name to one trigger row
//! (when to fire) and one action row (what to do).
//!
//! ## Architecture
//! ```text
//! TaskRegistry::create(name, "repeat", {...}, "echo", {...})
//!   ├── ActionKinds["echo"]  → EchoAction::create → actions_echo row
//!   │                        → to_execute(id) → callback (enqueue on dispatcher)
//!   ├── TriggerKinds["repeat"] → on_trigger(callback)
//!   │                          → RepeatTrigger::create → triggers_repeat row
//!   │                          → IntervalScheduler::schedule_job("repeat:<id>")
//!   └── tasks row {name, trigger_type, action_type, trigger_id, action_id}
//!
//! TaskRegistry::init()  (boot)
//!   └── every task → restart(trigger_id, startup = true) with a fresh callback
//! ```

pub mod action;
pub mod context;
pub mod echo;
pub mod interval;
pub mod persistence;
pub mod repeat;
pub mod tasks;
pub mod trigger;

pub use action::{Action, ActionKinds};
pub use context::TaskContext;
pub use echo::{EchoAction, EchoRow};
pub use interval::{ActiveJobs, Callback, IntervalScheduler, job_key};
pub use persistence::{Database, Record, Table};
pub use repeat::{RepeatRow, RepeatSpec, RepeatTrigger};
pub use tasks::{Orphans, TaskRegistry, TaskRow, validate_task_name};
pub use trigger::{Trigger, TriggerKinds};
