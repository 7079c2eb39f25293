//! CLI command definitions for the `relflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod definitions;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run and inspect durable workflows.
#[derive(Parser)]
#[command(name = "relflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding config.toml and the workflow database.
    #[arg(long, global = true, env = "RELFLOW_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a built-in workflow and follow it until it finishes.
    Run {
        /// Definition name (see `relflow definitions`).
        definition: String,

        /// Parameter binding as name=value; the value is parsed as JSON,
        /// falling back to a plain string.
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
    },

    /// Resume an interrupted workflow from its checkpoints.
    Resume {
        /// Workflow UUID.
        workflow_id: String,

        /// Reset a failed step before running; repeatable.
        #[arg(long = "retry", value_name = "STEP")]
        retry: Vec<String>,
    },

    /// List recent workflows.
    #[command(alias = "ls")]
    List {
        /// Maximum number of workflows to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show a workflow and the state of each of its steps.
    Show {
        /// Workflow UUID.
        workflow_id: String,
    },

    /// List the built-in definitions and their parameters.
    Definitions,
}
