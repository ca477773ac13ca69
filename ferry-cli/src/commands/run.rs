//! Run command handlers

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use ferry_client::OrchestratorClient;
use ferry_core::domain::run::{PipelineRun, RunStage, StageStatus};
use ferry_core::domain::spec::{Hyperparameters, PipelineSpec};
use ferry_core::domain::stage::Stage;
use ferry_core::dto::run::{RunPipelineRequest, RunSummary};
use std::time::Duration;

use crate::id_resolver::resolve_run_id;

/// Parameters of a new run
#[derive(Args)]
pub struct LaunchArgs {
    /// Run ID; reusing an id resumes that run instead of starting another
    #[arg(long)]
    run_id: Option<String>,

    /// Base model to tune
    #[arg(long, default_value = "")]
    base_model: String,

    /// Training dataset location (e.g. gs://bucket/train.jsonl)
    #[arg(long, default_value = "")]
    dataset_uri: String,

    #[arg(long, default_value_t = 3)]
    epochs: u32,

    #[arg(long, default_value_t = 1.0)]
    learning_rate_multiplier: f64,

    /// Display name of the tuned model
    #[arg(long)]
    tuned_model_name: Option<String>,

    /// Destination scope the artifact is promoted into
    #[arg(long)]
    dest_scope: String,

    /// Name of the promoted artifact
    #[arg(long)]
    dest_name: String,

    /// Promote this already tuned artifact instead of training
    #[arg(long, conflicts_with_all = ["base_model", "dataset_uri"])]
    source_artifact: Option<String>,

    /// Follow the run until it finishes
    #[arg(short, long)]
    wait: bool,

    /// Seconds between status checks with --wait
    #[arg(long, default_value_t = 10)]
    poll_secs: u64,
}

impl LaunchArgs {
    fn into_request(self) -> RunPipelineRequest {
        RunPipelineRequest {
            run_id: self.run_id,
            spec: PipelineSpec {
                base_model: self.base_model,
                dataset_uri: self.dataset_uri,
                hyperparameters: Hyperparameters {
                    epoch_count: self.epochs,
                    learning_rate_multiplier: self.learning_rate_multiplier,
                },
                tuned_model_name: self.tuned_model_name,
                dest_scope: self.dest_scope,
                dest_name: self.dest_name,
                source_artifact: self.source_artifact,
            },
        }
    }
}

pub async fn launch(client: &OrchestratorClient, args: LaunchArgs) -> Result<()> {
    let wait = args.wait;
    let poll = Duration::from_secs(args.poll_secs.max(1));

    let run = client
        .launch_run(args.into_request())
        .await
        .context("Failed to launch run")?;

    println!("{} Run {} accepted", "✓".green(), run.run_id.to_string().cyan());
    println!("  Stage: {}", colorize_stage(run.current_stage));

    if !wait {
        println!();
        println!(
            "{}",
            format!("Follow it with: ferry get {}", run.run_id).dimmed()
        );
        return Ok(());
    }

    let run = follow(client, run, poll).await?;
    println!();
    print_run_details(&run);
    if run.current_stage == RunStage::Failed {
        anyhow::bail!("run {} failed", run.run_id);
    }
    Ok(())
}

/// Poll a run until it is terminal, printing each stage change
async fn follow(client: &OrchestratorClient, mut run: PipelineRun, poll: Duration) -> Result<PipelineRun> {
    let run_id = run.run_id.to_string();
    let mut last = run.current_stage;

    while !run.current_stage.is_terminal() {
        tokio::time::sleep(poll).await;
        run = client.get_run(&run_id).await?;
        if run.current_stage != last {
            println!(
                "  {} {} {} {}",
                run.updated_at.format("%H:%M:%S").to_string().dimmed(),
                colorize_stage(last),
                "→".dimmed(),
                colorize_stage(run.current_stage)
            );
            last = run.current_stage;
        }
    }
    Ok(run)
}

pub async fn get(client: &OrchestratorClient, id: &str, json: bool) -> Result<()> {
    let run_id = resolve_run_id(client, id).await?;
    let run = client.get_run(&run_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run_details(&run);
    }
    Ok(())
}

pub async fn list(client: &OrchestratorClient) -> Result<()> {
    let runs = client.list_runs().await?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in runs {
            print_run_summary(&run);
        }
    }
    Ok(())
}

pub async fn cancel(client: &OrchestratorClient, id: &str) -> Result<()> {
    let run_id = resolve_run_id(client, id).await?;
    let response = client.cancel_run(&run_id).await?;

    if response.signalled {
        println!(
            "{} Cancellation sent to run {}",
            "✓".green(),
            run_id.cyan()
        );
        println!(
            "{}",
            "  The active stage stops at its next check.".dimmed()
        );
    } else if response.current_stage == RunStage::Failed {
        println!("{} Run {} cancelled", "✓".green(), run_id.cyan());
    } else {
        println!(
            "{} Run {} already finished ({})",
            "⚠".yellow(),
            run_id.cyan(),
            colorize_stage(response.current_stage)
        );
    }
    Ok(())
}

pub async fn retry(client: &OrchestratorClient, id: &str) -> Result<()> {
    let run_id = resolve_run_id(client, id).await?;
    let run = client.retry_run(&run_id).await?;

    println!(
        "{} Run {} re-entered {}",
        "✓".green(),
        run_id.cyan(),
        colorize_stage(run.current_stage)
    );
    Ok(())
}

pub async fn teardown(client: &OrchestratorClient, id: &str) -> Result<()> {
    let run_id = resolve_run_id(client, id).await?;
    let run = client.teardown_run(&run_id).await?;

    let endpoint = run.succeeded_output(Stage::Deploy).unwrap_or("-");
    println!(
        "{} Endpoint {} of run {} released",
        "✓".green(),
        endpoint.cyan(),
        run_id.cyan()
    );
    Ok(())
}

fn print_run_summary(run: &RunSummary) {
    println!("  {} Run {}", "▸".cyan(), run.run_id.to_string().bold());
    println!("    Destination: {}", run.dest_name.dimmed());
    println!("    Stage:       {}", colorize_stage(run.current_stage));
    if let Some(error) = &run.last_error {
        println!("    Error:       {}", error.to_string().red());
    }
    println!(
        "    Updated:     {}",
        run.updated_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_run_details(run: &PipelineRun) {
    println!("{}", "Run Details:".bold());
    println!("  ID:          {}", run.run_id.to_string().cyan());
    println!("  Stage:       {}", colorize_stage(run.current_stage));
    match &run.spec.source_artifact {
        Some(artifact) => println!("  Source:      {}", artifact),
        None => println!(
            "  Base model:  {} ({} epochs, lr x{})",
            run.spec.base_model,
            run.spec.hyperparameters.epoch_count,
            run.spec.hyperparameters.learning_rate_multiplier
        ),
    }
    println!(
        "  Destination: {}/{}",
        run.spec.dest_scope.dimmed(),
        run.spec.dest_name
    );
    println!("  Created:     {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(torn_down) = run.torn_down_at {
        println!("  Torn down:   {}", torn_down.format("%Y-%m-%d %H:%M:%S"));
    }

    println!("\n{}", "Stages:".bold());
    for stage in Stage::ALL {
        let line = match run.output(stage) {
            Some(output) => {
                let mark = match output.status {
                    StageStatus::Succeeded => "✓".green(),
                    StageStatus::Failed => "✗".red(),
                };
                let value = output
                    .output_id
                    .as_deref()
                    .or(output.detail.as_deref())
                    .unwrap_or("");
                format!("{} {:<9} {}", mark, stage.as_str(), value)
            }
            None => match run.pending_handle(stage) {
                Some(handle) => format!("{} {:<9} {}", "…".yellow(), stage.as_str(), handle.dimmed()),
                None => format!("{} {}", "·".dimmed(), stage.as_str().dimmed()),
            },
        };
        println!("  {}", line);
    }

    if let Some(error) = &run.last_error {
        println!("\n{}", "Error:".bold());
        let stage = error
            .stage
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  Stage:     {}", stage);
        println!("  Kind:      {}", error.kind.to_string().red());
        println!("  Retriable: {}", if error.retriable { "yes" } else { "no" });
        println!("  {}", error.message.red());
    }
}

/// Colorize a run stage for display
fn colorize_stage(stage: RunStage) -> ColoredString {
    let label = stage.as_str();
    match stage {
        RunStage::Done => label.green().bold(),
        RunStage::Failed => label.red().bold(),
        _ => label.yellow(),
    }
}
