//! Chat command router.
//!
//! `ping`, `parrot <text>` and the `task` family that manages repeat/echo
//! tasks from chat.

use chatterbox_core::error::{BotError, Result};
use chatterbox_scheduler::{TaskRegistry, TaskRow};
use serde_json::{Value, json};

const TASK_USAGE: &str = "usage: task add|remove|rename|interval|message|channel|list|clear";
const ADD_USAGE: &str = "usage: task add <name> <hours> <minutes> <seconds> <channel> <message>";

/// Run one command (tokens after the prefix). `Ok(None)` means no such command.
pub fn execute(tasks: &TaskRegistry, tokens: &[&str]) -> Result<Option<String>> {
    let Some((command, args)) = tokens.split_first() else {
        return Ok(None);
    };
    match command.to_lowercase().as_str() {
        "ping" => Ok(Some("pong".into())),
        "parrot" if args.is_empty() => Err(usage("usage: parrot <text>")),
        "parrot" => Ok(Some(args.join(" "))),
        "task" => task(tasks, args).map(Some),
        _ => Ok(None),
    }
}

fn task(tasks: &TaskRegistry, args: &[&str]) -> Result<String> {
    let Some((sub, rest)) = args.split_first() else {
        return Err(usage(TASK_USAGE));
    };
    match (sub.to_lowercase().as_str(), rest) {
        ("add", [name, h, m, s, channel, message @ ..]) if !message.is_empty() => {
            let trigger = interval_spec(h, m, s)?;
            let action = json!({"channel": channel, "message": message.join(" ")});
            let row = tasks.create(name, "repeat", &trigger, "echo", &action)?;
            Ok(format!("task {} added", row.name))
        }
        ("add", _) => Err(usage(ADD_USAGE)),
        ("remove", [name]) => {
            tasks.remove(name)?;
            Ok(format!("task {name} removed"))
        }
        ("rename", [old, new]) => {
            tasks.update_name(old, new)?;
            Ok(format!("task {old} renamed to {new}"))
        }
        ("interval", [name, h, m, s]) => {
            tasks.update_trigger(name, &interval_spec(h, m, s)?)?;
            Ok(format!("task {name} now repeats every {h}h {m}m {s}s"))
        }
        ("message", [name, message @ ..]) if !message.is_empty() => {
            tasks.update_action(name, &json!({"message": message.join(" ")}))?;
            Ok(format!("task {name} message updated"))
        }
        ("channel", [name, channel]) => {
            tasks.update_action(name, &json!({"channel": channel}))?;
            Ok(format!("task {name} now posts in #{}", channel.trim_start_matches('#')))
        }
        ("list", []) => Ok(describe(&tasks.list()?)),
        ("clear", []) => {
            let n = tasks.clear()?;
            Ok(format!("removed {n} tasks"))
        }
        _ => Err(usage(TASK_USAGE)),
    }
}

fn usage(text: &str) -> BotError {
    BotError::Validation(text.to_string())
}

fn interval_spec(hours: &str, minutes: &str, seconds: &str) -> Result<Value> {
    let number = |v: &str| {
        v.parse::<i64>()
            .map_err(|_| BotError::Validation(format!("'{v}' is not a whole number")))
    };
    Ok(json!({
        "hours": number(hours)?,
        "minutes": number(minutes)?,
        "seconds": number(seconds)?,
    }))
}

fn describe(rows: &[TaskRow]) -> String {
    if rows.is_empty() {
        return "no tasks".into();
    }
    rows.iter()
        .map(|t| {
            format!(
                "{} ({}:{} → {}:{})",
                t.name, t.trigger_type, t.trigger_id, t.action_type, t.action_id
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatterbox_channels::{ChannelRegistry, MemoryTransport};
    use chatterbox_scheduler::{Database, TaskContext};
    use std::sync::Arc;
    use std::time::Duration;

    fn registry() -> TaskRegistry {
        let transport = Arc::new(MemoryTransport::connected());
        let channels = ChannelRegistry::with_settings("bot", transport, None, Default::default());
        let ctx = TaskContext::new(Database::open_in_memory().unwrap(), channels);
        TaskRegistry::new(ctx).unwrap()
    }

    fn run(tasks: &TaskRegistry, line: &str) -> Result<Option<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        execute(tasks, &tokens)
    }

    #[tokio::test]
    async fn test_ping_and_parrot() {
        let tasks = registry();
        assert_eq!(run(&tasks, "ping").unwrap().as_deref(), Some("pong"));
        assert_eq!(run(&tasks, "PING").unwrap().as_deref(), Some("pong"));
        assert_eq!(
            run(&tasks, "parrot hello   world").unwrap().as_deref(),
            Some("hello world")
        );
        assert!(run(&tasks, "parrot").is_err());
        assert_eq!(run(&tasks, "dance").unwrap(), None);
        assert_eq!(run(&tasks, "").unwrap(), None);
    }

    #[tokio::test]
    async fn test_task_lifecycle() {
        let tasks = registry();
        assert_eq!(
            run(&tasks, "task add greet 1 0 0 somechannel hello there").unwrap().as_deref(),
            Some("task greet added")
        );
        let scheduler = &tasks.context().scheduler;
        assert_eq!(scheduler.period("repeat:1"), Some(Duration::from_secs(3600)));

        run(&tasks, "task interval greet 0 0 90").unwrap();
        assert_eq!(scheduler.period("repeat:1"), Some(Duration::from_secs(90)));

        run(&tasks, "task message greet good morning").unwrap();
        run(&tasks, "task channel greet #otherchannel").unwrap();
        run(&tasks, "task rename greet morning").unwrap();
        assert_eq!(
            run(&tasks, "task list").unwrap().as_deref(),
            Some("morning (repeat:1 → echo:1)")
        );

        assert_eq!(
            run(&tasks, "task remove morning").unwrap().as_deref(),
            Some("task morning removed")
        );
        assert_eq!(run(&tasks, "task list").unwrap().as_deref(), Some("no tasks"));
        assert_eq!(scheduler.job_count(), 0);
    }

    #[tokio::test]
    async fn test_task_errors_are_user_facing() {
        let tasks = registry();
        let err = run(&tasks, "task add greet one 0 0 somechannel hi").unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));
        assert!(err.user_message().contains("'one'"));

        assert!(matches!(
            run(&tasks, "task add greet 0 0 0 somechannel hi"),
            Err(BotError::Validation(_))
        ));
        assert!(matches!(
            run(&tasks, "task add greet 1 -59 0 somechannel hi"),
            Err(BotError::Validation(_))
        ));
        assert!(matches!(run(&tasks, "task add greet 1 0 0"), Err(BotError::Validation(_))));
        assert!(matches!(run(&tasks, "task remove nope"), Err(BotError::NotFound(_))));
        assert!(matches!(run(&tasks, "task"), Err(BotError::Validation(_))));
        assert!(matches!(run(&tasks, "task explode"), Err(BotError::Validation(_))));
    }

    #[tokio::test]
    async fn test_task_clear() {
        let tasks = registry();
        run(&tasks, "task add one 0 1 0 somechannel a").unwrap();
        run(&tasks, "task add two 0 2 0 somechannel b").unwrap();
        assert_eq!(run(&tasks, "task clear").unwrap().as_deref(), Some("removed 2 tasks"));
        assert!(tasks.list().unwrap().is_empty());
    }
}
