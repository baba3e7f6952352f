// src/lib.rs

pub mod broadcast;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod cycling;
pub mod engine;
pub mod errors;
pub mod flow;
pub mod graph;
pub mod job;
pub mod logging;
pub mod pool;
pub mod query;
pub mod taskdef;
pub mod types;
pub mod workflow;

use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::engine::{CoreScheduler, Runtime, RuntimeOptions, SchedulerEvent};
use crate::job::LocalJobBackend;
use crate::workflow::CompiledWorkflow;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - workflow definition loading and compilation
/// - the core scheduler (cold start or checkpoint restart)
/// - the local job backend
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    let compiled = workflow::compile(cfg)?;

    if args.dry_run {
        print_dry_run(&compiled);
        return Ok(());
    }

    let options = runtime_options(&compiled);

    let core = match (&options.checkpoint_path, args.restart) {
        (Some(path), true) if path.exists() => {
            let checkpoint = checkpoint::load(path)?;
            CoreScheduler::restore(compiled, checkpoint)
        }
        (None, true) => {
            anyhow::bail!("--restart requires [scheduler].checkpoint_path to be set");
        }
        _ => CoreScheduler::new(compiled),
    };

    // Scheduler event channel: job callbacks, commands, shutdown.
    let (event_tx, event_rx) = mpsc::channel::<SchedulerEvent>(64);

    // Local process job backend (production implementation).
    let backend = LocalJobBackend::new(event_tx.clone());

    // Ctrl-C → graceful shutdown.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(SchedulerEvent::Shutdown).await;
        });
    }

    info!(config = %args.config, "starting scheduler");

    let runtime = Runtime::new(core, event_rx, backend, options);
    runtime.run().await?;
    Ok(())
}

fn runtime_options(compiled: &CompiledWorkflow) -> RuntimeOptions {
    let scheduler = &compiled.config.scheduler;
    RuntimeOptions {
        stall_timeout_secs: scheduler.stall_timeout,
        stall_action: scheduler.stall_action,
        inactivity_timeout_secs: scheduler.inactivity_timeout,
        inactivity_action: scheduler.inactivity_action,
        checkpoint_path: scheduler.checkpoint_path.as_ref().map(PathBuf::from),
    }
}

/// Simple dry-run output: sequences, tasks, dependencies, queues.
fn print_dry_run(compiled: &CompiledWorkflow) {
    println!("cycleflow dry-run");
    println!("  cycling_mode: {:?}", compiled.mode);
    println!("  initial_cycle_point: {}", compiled.initial);
    if let Some(p) = &compiled.final_point {
        println!("  final_cycle_point: {p}");
    }
    println!();

    println!("sequences ({}):", compiled.graph.sequences.len());
    for (recurrence, seq) in &compiled.graph.sequences {
        println!("  - {recurrence}: {seq}");
    }
    println!();

    println!("tasks ({}):", compiled.graph.entries.len());
    for (name, entries) in &compiled.graph.entries {
        println!("  - {name}");
        if let Some(def) = compiled.defs.get(name) {
            if !def.script.is_empty() {
                println!("      script: {}", def.script);
            }
            if !def.retry_delays.is_empty() {
                let delays: Vec<String> =
                    def.retry_delays.iter().map(ToString::to_string).collect();
                println!("      retry_delays: {delays:?}");
            }
        }
        println!("      queue: {}", compiled.queues.queue_of(name));
        for entry in entries {
            let recurrence = compiled.recurrence(entry.seq);
            println!(
                "      [{recurrence}] prerequisites: {}, suicides: {}",
                entry.prereqs.len(),
                entry.suicides.len()
            );
        }
        if let Some(required) = compiled.graph.required_outputs.get(name) {
            let required: Vec<&str> = required.iter().map(String::as_str).collect();
            println!("      required outputs: {required:?}");
        }
    }
}
