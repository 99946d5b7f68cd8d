//! Repeat trigger — fires every `hours:minutes:seconds`.

use chatterbox_core::error::{BotError, Result};
use rusqlite::types::ToSql;
use serde::Deserialize;
use serde_json::Value;

use crate::context::TaskContext;
use crate::interval::{ActiveJobs, Callback, IntervalScheduler, MAX_PERIOD_SECS, job_key};
use crate::persistence::{Record, Table};
use crate::trigger::Trigger;

pub const KIND: &str = "repeat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatRow {
    pub id: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Record for RepeatRow {
    type Key = i64;
    const TABLE: &'static str = "triggers_repeat";
    const KEY: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &["hours", "minutes", "seconds"];
    const SCHEMA: &'static str = "CREATE TABLE IF NOT EXISTS triggers_repeat (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hours INTEGER NOT NULL,
            minutes INTEGER NOT NULL,
            seconds INTEGER NOT NULL
        )";

    fn key(&self) -> i64 {
        self.id
    }

    fn values(&self) -> Vec<&dyn ToSql> {
        vec![&self.hours, &self.minutes, &self.seconds]
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            hours: row.get(1)?,
            minutes: row.get(2)?,
            seconds: row.get(3)?,
        })
    }
}

impl RepeatRow {
    pub fn spec(&self) -> RepeatSpec {
        RepeatSpec {
            hours: self.hours,
            minutes: self.minutes,
            seconds: self.seconds,
        }
    }
}

/// `{"hours": h, "minutes": m, "seconds": s}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RepeatSpec {
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl RepeatSpec {
    pub fn parse(spec: &Value) -> Result<Self> {
        Self::deserialize(spec).map_err(|e| {
            BotError::Validation(format!(
                "repeat trigger needs whole-number hours, minutes and seconds: {e}"
            ))
        })
    }

    /// Interval length in seconds, `1..=2^31-1`. Every component must be
    /// zero or more.
    pub fn total_seconds(&self) -> Result<u64> {
        if self.hours < 0 || self.minutes < 0 || self.seconds < 0 {
            return Err(BotError::Validation(
                "hours, minutes and seconds cannot be negative".into(),
            ));
        }
        let total = self
            .hours
            .checked_mul(3600)
            .and_then(|h| self.minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
            .and_then(|hm| hm.checked_add(self.seconds));
        match total {
            Some(secs) if secs > 0 && secs as u64 <= MAX_PERIOD_SECS => Ok(secs as u64),
            Some(secs) if secs <= 0 => Err(BotError::Validation(
                "interval must be longer than zero seconds".into(),
            )),
            _ => Err(BotError::Validation(format!(
                "interval must be at most {MAX_PERIOD_SECS} seconds"
            ))),
        }
    }
}

pub struct RepeatTrigger {
    table: Table<RepeatRow>,
    scheduler: IntervalScheduler,
    active: ActiveJobs,
    callback: Option<Callback>,
}

impl RepeatTrigger {
    pub fn new(ctx: &TaskContext) -> Result<Self> {
        Ok(Self {
            table: ctx.db.table()?,
            scheduler: ctx.scheduler.clone(),
            active: ctx.active.clone(),
            callback: None,
        })
    }

    pub fn build(ctx: &TaskContext) -> Result<Box<dyn Trigger>> {
        Ok(Box::new(Self::new(ctx)?))
    }

    fn callback(&self) -> Result<Callback> {
        self.callback.clone().ok_or_else(|| {
            BotError::Validation("repeat trigger has no callback; call on_trigger first".into())
        })
    }

    fn is_armed(&self, key: &str) -> bool {
        self.active.contains(key) || self.scheduler.is_scheduled(key)
    }

    fn require_active(&self, key: &str) -> Result<()> {
        if self.active.contains(key) {
            Ok(())
        } else {
            Err(BotError::NotFound(format!("trigger {key} does not exist")))
        }
    }
}

impl Trigger for RepeatTrigger {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn on_trigger(&mut self, callback: Callback) {
        self.callback = Some(callback);
    }

    fn create(&mut self, spec: &Value) -> Result<i64> {
        let callback = self.callback()?;
        let spec = RepeatSpec::parse(spec)?;
        let secs = spec.total_seconds()?;

        let id = self.table.insert_auto(&RepeatRow {
            id: 0,
            hours: spec.hours,
            minutes: spec.minutes,
            seconds: spec.seconds,
        })?;
        let key = job_key(KIND, id);

        let armed = if self.is_armed(&key) {
            Err(BotError::Consistency(format!(
                "trigger {key} is already active before it was created"
            )))
        } else {
            self.scheduler.schedule_job(&key, secs, callback)
        };
        if let Err(e) = armed {
            if let Err(cleanup) = self.table.delete(&id) {
                tracing::warn!("Failed to remove trigger row {key}: {cleanup}");
            }
            return Err(e);
        }

        self.active.insert(&key);
        tracing::info!("🔁 Repeat trigger {key} armed every {secs}s");
        Ok(id)
    }

    fn restart(&mut self, id: i64, startup: bool) -> Result<()> {
        let key = job_key(KIND, id);
        let Some(row) = self.table.get(&id)? else {
            if self.is_armed(&key) {
                tracing::error!("👻 Ghost schedule: {key} is armed but has no stored row");
                return Err(BotError::Consistency(format!(
                    "ghost schedule: {key} is active without a stored row"
                )));
            }
            return Err(BotError::NotFound(format!("trigger {key} does not exist")));
        };
        let callback = self.callback()?;
        let secs = row.spec().total_seconds()?;

        if startup {
            if self.is_armed(&key) {
                tracing::error!("👻 Duplicate schedule at boot: {key} is already armed");
                return Err(BotError::Consistency(format!(
                    "trigger {key} is already active at startup"
                )));
            }
            self.scheduler.schedule_job(&key, secs, callback)?;
            self.active.insert(&key);
            tracing::debug!("🔁 Repeat trigger {key} re-armed every {secs}s");
        } else {
            self.require_active(&key)?;
            self.scheduler.cancel_job(&key);
            self.scheduler.schedule_job(&key, secs, callback)?;
            tracing::debug!("🔁 Repeat trigger {key} rescheduled every {secs}s");
        }
        Ok(())
    }

    fn update(&mut self, id: i64, spec: &Value) -> Result<()> {
        let key = job_key(KIND, id);
        self.require_active(&key)?;
        let callback = self.callback()?;
        let spec = RepeatSpec::parse(spec)?;
        let secs = spec.total_seconds()?;
        let previous = self.table.require(&id)?;

        self.scheduler.cancel_job(&key);
        let updated = RepeatRow {
            id,
            hours: spec.hours,
            minutes: spec.minutes,
            seconds: spec.seconds,
        };
        if let Err(e) = self.table.update(&updated) {
            // Keep firing on the old interval.
            if let Ok(old_secs) = previous.spec().total_seconds() {
                self.scheduler.schedule_job(&key, old_secs, callback)?;
            }
            return Err(e);
        }
        self.scheduler.schedule_job(&key, secs, callback)?;
        tracing::info!("🔁 Repeat trigger {key} now every {secs}s");
        Ok(())
    }

    fn delete(&mut self, id: i64) -> Result<()> {
        let key = job_key(KIND, id);
        self.require_active(&key)?;
        self.table.delete(&id)?;
        self.scheduler.cancel_job(&key);
        self.active.remove(&key);
        tracing::debug!("🔁 Repeat trigger {key} deleted");
        Ok(())
    }

    fn discard(&mut self, id: i64) -> Result<()> {
        let key = job_key(KIND, id);
        self.scheduler.cancel_job(&key);
        self.active.remove(&key);
        match self.table.delete(&id) {
            Ok(()) | Err(BotError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn ids(&self) -> Result<Vec<i64>> {
        self.table.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatterbox_channels::{ChannelRegistry, MemoryTransport};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn context() -> TaskContext {
        let transport = Arc::new(MemoryTransport::connected());
        let channels = ChannelRegistry::with_settings("bot", transport, None, Default::default());
        TaskContext::new(crate::persistence::Database::open_in_memory().unwrap(), channels)
    }

    fn counting_trigger(ctx: &TaskContext) -> (RepeatTrigger, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut trigger = RepeatTrigger::new(ctx).unwrap();
        trigger.on_trigger(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        (trigger, count)
    }

    fn spec(h: i64, m: i64, s: i64) -> Value {
        json!({"hours": h, "minutes": m, "seconds": s})
    }

    #[test]
    fn test_total_seconds_bounds() {
        let ok = |h, m, s| RepeatSpec { hours: h, minutes: m, seconds: s }.total_seconds();
        assert_eq!(ok(1, 0, 0).unwrap(), 3600);
        assert_eq!(ok(0, 1, 30).unwrap(), 90);
        assert_eq!(ok(0, 0, 2_147_483_647).unwrap(), MAX_PERIOD_SECS);
        assert!(ok(1, -59, 0).is_err());
        assert!(ok(0, 0, 0).is_err());
        assert!(ok(0, 0, 2_147_483_648).is_err());
        assert!(ok(596_524, 0, 0).is_err());
        assert!(ok(i64::MAX, 0, 0).is_err());
        assert!(ok(0, -1, 0).is_err());
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        assert!(RepeatSpec::parse(&json!({"hours": "1", "minutes": 0, "seconds": 0})).is_err());
        assert!(RepeatSpec::parse(&json!({"hours": 1, "minutes": 0})).is_err());
        assert!(RepeatSpec::parse(&json!({"hours": 1.5, "minutes": 0, "seconds": 0})).is_err());
        assert!(RepeatSpec::parse(&spec(0, 0, 5)).is_ok());
    }

    #[tokio::test]
    async fn test_create_schedules_job() {
        let ctx = context();
        let (mut trigger, _) = counting_trigger(&ctx);
        let id = trigger.create(&spec(0, 2, 5)).unwrap();
        assert_eq!(id, 1);
        assert_eq!(ctx.scheduler.period("repeat:1"), Some(Duration::from_secs(125)));
        assert!(ctx.active.contains("repeat:1"));
        assert_eq!(trigger.ids().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_invalid_interval_is_not_persisted() {
        let ctx = context();
        let (mut trigger, _) = counting_trigger(&ctx);
        assert!(matches!(trigger.create(&spec(0, 0, 0)), Err(BotError::Validation(_))));
        assert!(trigger.create(&spec(0, 0, 2_147_483_648)).is_err());
        assert!(trigger.ids().unwrap().is_empty());
        assert_eq!(ctx.scheduler.job_count(), 0);
    }

    #[tokio::test]
    async fn test_negative_components_rejected() {
        let ctx = context();
        let (mut trigger, _) = counting_trigger(&ctx);
        let err = trigger.create(&spec(1, -59, 0)).unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));
        assert!(trigger.create(&spec(0, 0, -5)).is_err());
        assert!(trigger.ids().unwrap().is_empty());

        let id = trigger.create(&spec(0, 2, 0)).unwrap();
        assert!(matches!(trigger.update(id, &spec(-1, 0, 3700)), Err(BotError::Validation(_))));
        assert_eq!(ctx.scheduler.period("repeat:1"), Some(Duration::from_secs(120)));
        assert_eq!(ctx.db.table::<RepeatRow>().unwrap().require(&id).unwrap().hours, 0);
    }

    #[tokio::test]
    async fn test_discard_unarmed_row() {
        let ctx = context();
        let (mut trigger, _) = counting_trigger(&ctx);
        let id = trigger.create(&spec(0, 0, 5)).unwrap();
        let armed = trigger.create(&spec(0, 0, 5)).unwrap();

        // Row kept but never armed, as after a skipped startup.
        ctx.scheduler.cancel_job("repeat:1");
        ctx.active.remove("repeat:1");
        assert!(matches!(trigger.delete(id), Err(BotError::NotFound(_))));
        trigger.discard(id).unwrap();
        assert_eq!(trigger.ids().unwrap(), vec![armed]);
        trigger.discard(id).unwrap();

        trigger.discard(armed).unwrap();
        assert!(trigger.ids().unwrap().is_empty());
        assert_eq!(ctx.scheduler.job_count(), 0);
        assert!(ctx.active.is_empty());
    }

    #[tokio::test]
    async fn test_create_requires_callback() {
        let ctx = context();
        let mut trigger = RepeatTrigger::new(&ctx).unwrap();
        assert!(trigger.create(&spec(0, 0, 5)).is_err());
        assert!(trigger.ids().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_on_period() {
        let ctx = context();
        let (mut trigger, count) = counting_trigger(&ctx);
        trigger.create(&spec(0, 0, 10)).unwrap();
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_reschedules() {
        let ctx = context();
        let (mut trigger, count) = counting_trigger(&ctx);
        let id = trigger.create(&spec(0, 0, 10)).unwrap();
        trigger.update(id, &spec(0, 1, 0)).unwrap();
        assert_eq!(ctx.scheduler.period("repeat:1"), Some(Duration::from_secs(60)));
        assert_eq!(ctx.db.table::<RepeatRow>().unwrap().require(&id).unwrap().minutes, 1);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(trigger.update(id, &spec(0, 0, 0)).is_err());
        assert_eq!(ctx.scheduler.period("repeat:1"), Some(Duration::from_secs(60)));
        assert!(matches!(trigger.update(99, &spec(0, 0, 5)), Err(BotError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_requires_active() {
        let ctx = context();
        let (mut trigger, _) = counting_trigger(&ctx);
        let id = trigger.create(&spec(0, 0, 10)).unwrap();
        trigger.delete(id).unwrap();
        assert!(!ctx.scheduler.is_scheduled("repeat:1"));
        assert!(ctx.active.is_empty());
        assert!(matches!(trigger.delete(id), Err(BotError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_restart_at_startup() {
        let ctx = context();
        let table = ctx.db.table::<RepeatRow>().unwrap();
        let id = table
            .insert_auto(&RepeatRow { id: 0, hours: 0, minutes: 0, seconds: 42 })
            .unwrap();

        let (mut trigger, _) = counting_trigger(&ctx);
        trigger.restart(id, true).unwrap();
        assert_eq!(ctx.scheduler.period("repeat:1"), Some(Duration::from_secs(42)));

        let err = trigger.restart(id, true).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(ctx.scheduler.job_count(), 1);

        trigger.restart(id, false).unwrap();
        assert_eq!(ctx.scheduler.job_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_without_row() {
        let ctx = context();
        let (mut trigger, _) = counting_trigger(&ctx);
        assert!(matches!(trigger.restart(7, true), Err(BotError::NotFound(_))));
        assert!(matches!(trigger.restart(7, false), Err(BotError::NotFound(_))));

        // Row deleted behind the trigger's back while its job keeps running.
        let id = trigger.create(&spec(0, 0, 10)).unwrap();
        ctx.db.table::<RepeatRow>().unwrap().delete(&id).unwrap();
        let err = trigger.restart(id, false).unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_restart_not_active_outside_startup() {
        let ctx = context();
        let table = ctx.db.table::<RepeatRow>().unwrap();
        let id = table
            .insert_auto(&RepeatRow { id: 0, hours: 1, minutes: 0, seconds: 0 })
            .unwrap();
        let (mut trigger, _) = counting_trigger(&ctx);
        assert!(matches!(trigger.restart(id, false), Err(BotError::NotFound(_))));
        assert_eq!(ctx.scheduler.job_count(), 0);
    }
}
