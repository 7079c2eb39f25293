//! CLI workflow subcommands: run, resume, list, show.
//!
//! `run` and `resume` drive the engine in-process through a `Worker` and
//! print step transitions from the event bus until the workflow finishes or
//! the operator presses Ctrl+C. An interrupted workflow stays resumable.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value as Json;
use uuid::Uuid;

use relflow_core::event::bus::WorkflowSubscription;
use relflow_core::repository::workflow::WorkflowRepository;
use relflow_core::workflow::Workflow;
use relflow_types::event::WorkflowEvent;
use relflow_types::workflow::{Params, StepStatus, WorkflowRecord};

use super::definitions;
use crate::state::{AppState, ConcreteWorker};

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn handle_run(name: &str, raw_params: &[String], state: &AppState, json: bool) -> Result<()> {
    let def = definitions::lookup(name)
        .with_context(|| format!("Unknown definition '{name}'. Run `relflow definitions` to list them."))?;
    let params = parse_params(raw_params)?;

    let worker = state.worker();
    let workflow = Workflow::start(def, params).context("Failed to start workflow")?;
    let mut events = worker.event_bus().subscribe_workflow(workflow.id());
    let id = worker.submit(name, workflow).await?;

    if !json {
        println!();
        println!(
            "  {} Started workflow '{}'",
            style("*").green().bold(),
            style(name).cyan()
        );
        println!("  ID: {id}");
        println!();
    }

    follow(&worker, id, &mut events, json).await
}

/// Parse `name=value` bindings. Values that are not valid JSON are taken as
/// plain strings.
fn parse_params(raw: &[String]) -> Result<Params> {
    let mut params = Params::new();
    for binding in raw {
        let (name, value) = binding
            .split_once('=')
            .with_context(|| format!("Invalid parameter '{binding}': expected NAME=VALUE"))?;
        let value = serde_json::from_str::<Json>(value).unwrap_or_else(|_| Json::String(value.to_string()));
        if params.insert(name.to_string(), value).is_some() {
            bail!("Parameter '{name}' given more than once");
        }
    }
    Ok(params)
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

pub async fn handle_resume(id_str: &str, retry: &[String], state: &AppState, json: bool) -> Result<()> {
    let id = parse_workflow_id(id_str)?;
    let worker = state.worker();
    let record = worker
        .repo()
        .get_workflow(&id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up workflow: {e}"))?
        .with_context(|| format!("Workflow '{id}' not found"))?;
    if record.finished {
        bail!("Workflow '{id}' already finished");
    }
    let def = definitions::lookup(&record.name)
        .with_context(|| format!("Definition '{}' is no longer available", record.name))?;

    let mut events = worker.event_bus().subscribe_workflow(id);
    worker.resume(id, def).await.context("Failed to resume workflow")?;
    for step in retry {
        worker
            .retry_task(id, step)
            .await
            .with_context(|| format!("Failed to retry step '{step}'"))?;
    }

    if !json {
        println!();
        println!(
            "  {} Resumed workflow '{}'",
            style("*").green().bold(),
            style(&record.name).cyan()
        );
        println!("  ID: {id}");
        println!();
    }

    follow(&worker, id, &mut events, json).await
}

// ---------------------------------------------------------------------------
// Follow
// ---------------------------------------------------------------------------

/// Print events of workflow `id` until it finishes or Ctrl+C is pressed.
async fn follow(worker: &ConcreteWorker, id: Uuid, events: &mut WorkflowSubscription, json: bool) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    print_event(&event);
                }
                if matches!(event, WorkflowEvent::WorkflowFinished { .. }) {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                worker.shutdown().await;
                if !json {
                    println!();
                    println!(
                        "  {} Interrupted. Resume with: {}",
                        style("!").yellow().bold(),
                        style(format!("relflow resume {id}")).cyan()
                    );
                    println!();
                }
                return Ok(());
            }
        }
    }

    worker.shutdown().await;
    Ok(())
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::WorkflowStarted { .. } => {}
        WorkflowEvent::StepStateChanged { step, state, .. } => {
            let status = state.status();
            let mut line = format!("  {:<10} {}", styled_status(status), step);
            if state.retry_count > 0 {
                line.push_str(&format!(" (retry {})", state.retry_count));
            }
            if let Some(err) = &state.error {
                line.push_str(&format!(": {}", style(err).red()));
            }
            println!("{line}");
        }
        WorkflowEvent::WorkflowStalled { workflow_id } => {
            println!();
            println!(
                "  {} Workflow stalled: no step can run. Press Ctrl+C, then {}",
                style("!").yellow().bold(),
                style(format!("relflow resume {workflow_id} --retry <step>")).cyan()
            );
            println!();
        }
        WorkflowEvent::WorkflowFinished { outputs, error, .. } => {
            println!();
            if let Some(err) = error {
                println!("  {} Workflow ended: {}", style("x").red().bold(), style(err).red());
            } else {
                println!("  {} Workflow completed", style("*").green().bold());
            }
            if let Some(outputs) = outputs {
                let mut names: Vec<&String> = outputs.keys().collect();
                names.sort();
                for name in names {
                    println!("  {} = {}", style(name).cyan(), outputs[name]);
                }
            }
            println!();
        }
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn handle_list(limit: u32, state: &AppState, json: bool) -> Result<()> {
    let records = state
        .repo()
        .list_workflows(limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list workflows: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!();
        println!("  No workflows yet. Start one with `relflow run <definition>`.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Definition"),
            Cell::new("Status"),
            Cell::new("Created"),
            Cell::new("Updated"),
        ]);

    for r in &records {
        table.add_row(vec![
            Cell::new(r.id),
            Cell::new(&r.name),
            format_workflow_status(r),
            Cell::new(r.created_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(r.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

pub async fn handle_show(id_str: &str, state: &AppState, json: bool) -> Result<()> {
    let id = parse_workflow_id(id_str)?;
    let repo = state.repo();
    let record = repo
        .get_workflow(&id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get workflow: {e}"))?
        .with_context(|| format!("Workflow '{id}' not found"))?;
    let steps = repo
        .list_steps(&id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list steps: {e}"))?;

    if json {
        let out = serde_json::json!({
            "workflow": record,
            "steps": steps,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} {}", style("Workflow:").bold(), style(record.id).cyan());
    println!("  Definition: {}", style(&record.name).cyan());
    println!("  Status: {}", workflow_status_label(&record));
    println!("  Created: {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", record.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if !record.params.is_empty() {
        println!("  Parameters:");
        let mut names: Vec<&String> = record.params.keys().collect();
        names.sort();
        for name in names {
            println!("    {name} = {}", record.params[name]);
        }
    }
    if let Some(ref err) = record.error {
        println!("  Error: {}", style(err).red());
    }

    if steps.is_empty() {
        println!();
        println!("  No step checkpoints recorded.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Retries"),
            Cell::new("Result / Error"),
        ]);

    for s in &steps {
        let detail = match (&s.error, &s.result) {
            (Some(err), _) => truncate(err, 80),
            (None, Some(result)) => truncate(&result.to_string(), 80),
            (None, None) => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(&s.name),
            format_step_status(s.status()),
            Cell::new(s.retry_count),
            Cell::new(detail),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_workflow_id(s: &str) -> Result<Uuid> {
    s.parse()
        .with_context(|| format!("Invalid workflow ID: '{s}'"))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

fn workflow_status_label(record: &WorkflowRecord) -> &'static str {
    match (record.finished, record.error.is_some()) {
        (false, _) => "unfinished",
        (true, false) => "completed",
        (true, true) => "failed",
    }
}

fn format_workflow_status(record: &WorkflowRecord) -> Cell {
    let label = workflow_status_label(record);
    match label {
        "completed" => Cell::new(label).fg(Color::Green),
        "failed" => Cell::new(label).fg(Color::Red),
        _ => Cell::new(label).fg(Color::Yellow),
    }
}

fn format_step_status(status: StepStatus) -> Cell {
    match status {
        StepStatus::Pending => Cell::new("pending").fg(Color::Yellow),
        StepStatus::Running => Cell::new("running").fg(Color::Blue),
        StepStatus::Succeeded => Cell::new("succeeded").fg(Color::Green),
        StepStatus::Failed => Cell::new("failed").fg(Color::Red),
    }
}

fn styled_status(status: StepStatus) -> String {
    let label = status.to_string();
    match status {
        StepStatus::Pending => style(label).yellow().to_string(),
        StepStatus::Running => style(label).blue().to_string(),
        StepStatus::Succeeded => style(label).green().to_string(),
        StepStatus::Failed => style(label).red().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_parse_json_and_fall_back_to_strings() {
        let raw = vec![
            "greeting=hello".to_string(),
            "items=[\"a\",\"b\"]".to_string(),
            "quoted=\"x=y\"".to_string(),
        ];
        let params = parse_params(&raw).unwrap();
        assert_eq!(params["greeting"], json!("hello"));
        assert_eq!(params["items"], json!(["a", "b"]));
        assert_eq!(params["quoted"], json!("x=y"));
    }

    #[test]
    fn params_require_equals_sign() {
        assert!(parse_params(&["greeting".to_string()]).is_err());
    }

    #[test]
    fn duplicate_params_are_rejected() {
        let raw = vec!["a=1".to_string(), "a=2".to_string()];
        assert!(parse_params(&raw).is_err());
    }

    #[test]
    fn workflow_id_must_be_uuid() {
        assert!(parse_workflow_id("not-a-uuid").is_err());
        let id = Uuid::now_v7();
        assert_eq!(parse_workflow_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn status_label_follows_record() {
        let mut record = WorkflowRecord::new(Uuid::now_v7(), "echo", Params::new());
        assert_eq!(workflow_status_label(&record), "unfinished");
        record.finished = true;
        assert_eq!(workflow_status_label(&record), "completed");
        record.error = Some("workflow cancelled".to_string());
        assert_eq!(workflow_status_label(&record), "failed");
    }
}
