//! Built-in workflow definitions and the `definitions` subcommand.
//!
//! Definitions are code, not data: a stored workflow only records the name
//! of the definition it was started from, and `lookup` rebuilds it on resume.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use relflow_core::workflow::dag::execution_waves;
use relflow_core::workflow::{
    Builder, Definition, ParamDef, SLICE_SHORT, Scope, TaskContext, Value, constant, slice,
};

/// Names of the built-in definitions, with a one-line summary.
pub const BUILTINS: &[(&str, &str)] = &[
    ("echo", "Echo a greeting and a farewell"),
    ("fan-out", "Process each item of a list in its own step, then join the results"),
];

/// Build the definition registered under `name`.
pub fn lookup(name: &str) -> Option<Definition> {
    match name {
        "echo" => Some(echo()),
        "fan-out" => Some(fan_out()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// echo
// ---------------------------------------------------------------------------

async fn echo_step(ctx: TaskContext, message: String) -> anyhow::Result<String> {
    ctx.log(format!("echo: {message}"));
    Ok(message)
}

fn echo() -> Definition {
    let mut wd = Definition::new();
    let greeting = wd.param(
        ParamDef::<String>::new("greeting")
            .with_doc("Said first")
            .with_example("hello"),
    );
    let farewell = wd.param(
        ParamDef::<String>::new("farewell")
            .with_doc("Said last")
            .with_example("goodbye"),
    );

    let said_greeting = wd.task1("echo greeting", echo_step, &greeting);
    let said_farewell = wd.after(&[&said_greeting]).task1("echo farewell", echo_step, &farewell);
    wd.output("greeting", &said_greeting);
    wd.output("farewell", &said_farewell);
    wd
}

// ---------------------------------------------------------------------------
// fan-out
// ---------------------------------------------------------------------------

async fn split(ctx: TaskContext, items: Vec<String>) -> anyhow::Result<Vec<String>> {
    let items: Vec<String> = items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    ctx.log(format!("fanning out over {} items", items.len()));
    Ok(items)
}

async fn process(ctx: TaskContext, item: String) -> anyhow::Result<String> {
    ctx.log(format!("processing {item}"));
    Ok(item.to_uppercase())
}

async fn join(_ctx: TaskContext, parts: Vec<String>) -> anyhow::Result<String> {
    Ok(parts.join(", "))
}

/// Registers one `process` step per item and a `join` over all of them.
fn fan_out_items(wd: &mut Scope<'_>, items: Vec<String>) -> anyhow::Result<()> {
    let processed: Vec<Value<String>> = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| wd.task1(&format!("process {}", i + 1), process, &constant(item)))
        .collect();
    let parts = slice(&processed.iter().collect::<Vec<_>>());
    let joined = wd.task1("join", join, &parts);
    wd.output("joined", &joined);
    Ok(())
}

fn fan_out() -> Definition {
    let mut wd = Definition::new();
    let items = wd.param(
        ParamDef::<Vec<String>>::new("items")
            .with_type(SLICE_SHORT)
            .with_doc("Items to process in parallel")
            .with_example(r#"["alpha", "beta"]"#),
    );
    let cleaned = wd.task1("split", split, &items);
    wd.sub("fan out").expand1("expand", fan_out_items, &cleaned);
    wd
}

// ---------------------------------------------------------------------------
// `relflow definitions`
// ---------------------------------------------------------------------------

pub fn handle_definitions(json: bool) -> Result<()> {
    if json {
        let out: Vec<_> = BUILTINS
            .iter()
            .filter_map(|(name, summary)| {
                let def = lookup(name)?;
                Some(serde_json::json!({
                    "name": name,
                    "summary": summary,
                    "parameters": def.parameters(),
                    "steps": def.steps().map(|s| s.name()).collect::<Vec<_>>(),
                }))
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for (name, summary) in BUILTINS {
        let Some(def) = lookup(name) else { continue };
        let waves = execution_waves(&def)?;

        println!();
        println!("  {} {}", style(name).cyan().bold(), style(summary).dim());
        println!("  Initial steps: {} in {} waves", def.steps().count(), waves.len());

        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Parameter").fg(Color::Cyan),
                Cell::new("Type"),
                Cell::new("Required"),
                Cell::new("Example"),
                Cell::new("Doc"),
            ]);
        for param in def.parameters() {
            table.add_row(vec![
                Cell::new(&param.name),
                Cell::new(&param.type_name),
                Cell::new(if param.required { "yes" } else { "no" }),
                Cell::new(&param.example),
                Cell::new(&param.doc),
            ]);
        }
        println!("{table}");
    }
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relflow_core::workflow::{TracingListener, Workflow};
    use relflow_types::workflow::Params;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn every_builtin_resolves() {
        for (name, _) in BUILTINS {
            assert!(lookup(name).is_some(), "{name} missing");
        }
        assert!(lookup("nope").is_none());
    }

    #[tokio::test]
    async fn echo_returns_both_messages() {
        let params = Params::from([
            ("greeting".to_string(), json!("hi")),
            ("farewell".to_string(), json!("bye")),
        ]);
        let mut wf = Workflow::start(echo(), params).unwrap();
        let outputs = wf.run(&CancellationToken::new(), &TracingListener).await.unwrap();
        assert_eq!(outputs["greeting"], json!("hi"));
        assert_eq!(outputs["farewell"], json!("bye"));
    }

    #[tokio::test]
    async fn fan_out_processes_every_item() {
        let params = Params::from([("items".to_string(), json!(["alpha", " ", "beta"]))]);
        let mut wf = Workflow::start(fan_out(), params).unwrap();
        let outputs = wf.run(&CancellationToken::new(), &TracingListener).await.unwrap();
        assert_eq!(outputs["fan out: joined"], json!("ALPHA, BETA"));
        assert!(wf.definition().step("fan out: process 2").is_some());
    }

    #[test]
    fn fan_out_rejects_empty_list() {
        let params = Params::from([("items".to_string(), json!([]))]);
        assert!(Workflow::start(fan_out(), params).is_err());
    }
}
