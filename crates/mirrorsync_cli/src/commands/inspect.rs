//! Inspect command implementation.

use super::{read_messages, MessageLine};
use crate::config::SubscriberConfig;
use mirrorsync_engine::HandlerRegistry;
use mirrorsync_protocol::{SyncMessage, Validation};
use serde::Serialize;
use std::path::Path;

/// Inspection result for one line.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineReport {
    /// 1-based line number.
    pub line: usize,
    /// `kind/id` of the message, if it decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Action, if the message decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Problems found.
    pub problems: Vec<String>,
}

/// File inspection result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    /// File path.
    pub path: String,
    /// Number of messages.
    pub messages: usize,
    /// Number of messages with problems.
    pub invalid: usize,
    /// Number of force-sync messages.
    pub force_sync: usize,
    /// Per-line results.
    pub lines: Vec<LineReport>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    config_path: Option<&Path>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = match config_path {
        Some(config) => Some(SubscriberConfig::load(config)?.registry()),
        None => None,
    };
    let lines = read_messages(path)?;
    let result = inspect(path, lines, registry.as_ref());

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    if result.invalid > 0 {
        return Err(format!("{} of {} messages invalid", result.invalid, result.messages).into());
    }
    Ok(())
}

/// Checks each line, and with a registry also the subscriber's schema and
/// references.
pub fn inspect(
    path: &Path,
    lines: Vec<MessageLine>,
    registry: Option<&HandlerRegistry>,
) -> InspectResult {
    let mut reports = Vec::with_capacity(lines.len());
    let mut force_sync = 0;

    for MessageLine { line, message } in lines {
        let report = match message {
            Ok(message) => {
                if message.is_force_sync {
                    force_sync += 1;
                }
                let problems = registry
                    .map(|registry| check_against(registry, &message))
                    .unwrap_or(Validation::Valid)
                    .reasons()
                    .to_vec();
                LineReport {
                    line,
                    entity: Some(message.key().to_string()),
                    action: Some(message.crud_action.to_string()),
                    problems,
                }
            }
            Err(err) => {
                let mut problems = err.reasons();
                if problems.is_empty() {
                    problems.push(err.to_string());
                }
                LineReport {
                    line,
                    entity: None,
                    action: None,
                    problems,
                }
            }
        };
        reports.push(report);
    }

    InspectResult {
        path: path.display().to_string(),
        messages: reports.len(),
        invalid: reports.iter().filter(|r| !r.problems.is_empty()).count(),
        force_sync,
        lines: reports,
    }
}

fn check_against(registry: &HandlerRegistry, message: &SyncMessage) -> Validation {
    let Some(handler) = registry.get(&message.entity_kind) else {
        return Validation::Valid;
    };
    if message.crud_action.is_deletion() {
        return handler.schema().check(&message.snapshot, false);
    }

    let references: Validation = handler
        .requirements()
        .iter()
        .map(|req| match req.reference(&message.snapshot) {
            Ok(_) => Validation::Valid,
            Err(reason) => Validation::invalid(reason),
        })
        .collect();
    handler
        .schema()
        .check(&message.snapshot, true)
        .and(references)
}

fn print_text_output(result: &InspectResult) {
    println!("File: {}", result.path);
    println!("Messages:   {}", result.messages);
    println!("Force-sync: {}", result.force_sync);
    println!("Invalid:    {}", result.invalid);

    for report in result.lines.iter().filter(|r| !r.problems.is_empty()) {
        let entity = report.entity.as_deref().unwrap_or("?");
        println!("  line {} ({}):", report.line, entity);
        for problem in &report.problems {
            println!("    - {}", problem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::parse_messages;

    const CONFIG: &str = r#"{
        "handlers": [
            {
                "kind": "employee",
                "fields": ["name", "companyId"],
                "dependencies": [{ "field": "companyId", "kind": "company" }]
            }
        ]
    }"#;

    const MESSAGES: &str = concat!(
        r#"{"entityId":"e-1","entityKind":"employee","crudAction":"Created","snapshot":{"name":"Ada","companyId":"c-1"},"emittedAt":1}"#,
        "\n",
        r#"{"entityId":"e-2","entityKind":"employee","crudAction":"Updated","snapshot":{"name":"Bob"},"emittedAt":2,"isForceSync":true}"#,
        "\n",
        r#"{"entityId":"","entityKind":"employee","crudAction":"Created","emittedAt":3}"#,
        "\n",
        r#"{"entityId":"e-3","entityKind":"employee","crudAction":"Deleted","emittedAt":4}"#,
        "\n",
    );

    #[test]
    fn decode_only() {
        let result = inspect(Path::new("m.jsonl"), parse_messages(MESSAGES), None);
        assert_eq!(result.messages, 4);
        assert_eq!(result.invalid, 1);
        assert_eq!(result.force_sync, 1);
        assert_eq!(result.lines[2].problems, vec!["entityId is empty".to_string()]);
    }

    #[test]
    fn with_subscriber_config() {
        let registry = SubscriberConfig::from_json(CONFIG).unwrap().registry();
        let result = inspect(Path::new("m.jsonl"), parse_messages(MESSAGES), Some(&registry));

        assert!(result.lines[0].problems.is_empty());
        // Missing companyId is both a missing field and a missing reference.
        assert_eq!(result.lines[1].problems.len(), 2);
        assert!(result.lines[3].problems.is_empty());
        assert_eq!(result.invalid, 2);
    }

    #[test]
    fn run_fails_on_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        std::fs::write(&path, MESSAGES).unwrap();
        assert!(run(&path, None, "text").is_err());

        std::fs::write(&path, MESSAGES.lines().next().unwrap()).unwrap();
        assert!(run(&path, None, "json").is_ok());
    }
}
