mod app;
mod repl;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wayline_engine::engine::{self, EngineKind};
use wayline_engine::runner::{RunContext, StopSignal};

#[derive(Parser)]
#[command(name = "wayline", version, about = "Natural-language browser automation")]
struct Args {
    /// Config file (defaults to ./wayline.yaml, then ~/.wayline/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Engine to use: direct_driver, agent_bridge or autonomous
    #[arg(long, global = true)]
    engine: Option<EngineKind>,

    /// Launch the browser in visible mode (not headless)
    #[arg(long, global = true)]
    visible: bool,

    /// Per-operation timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Directory to write result JSON files to
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand)]
enum Mode {
    /// Plan and execute a command, printing the result as JSON
    Run {
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,

        /// Stream progress events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },
    /// Print the execution plan for a command without running it
    Plan {
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Report which engines are available
    Probe {
        /// Launch and self-test each engine
        #[arg(long)]
        deep: bool,
    },
    /// Interactive session, or run commands from a file
    Repl {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries results.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let overrides = app::Overrides {
        engine: args.engine,
        visible: args.visible,
        timeout_ms: args.timeout_ms,
        output_dir: args.output_dir.clone(),
    };
    let config = app::load_config(args.config.as_deref(), &overrides).await?;
    let factory = app::engine_factory(&config)?;

    match args.mode.unwrap_or(Mode::Repl { file: None }) {
        Mode::Plan { command } => {
            // Planning never touches the page, so the engine stays unlaunched.
            let engine = factory.create_engine(EngineKind::DirectDriver, &config.engine)?;
            let automation = app::automation(&config, engine::shared(engine), EngineKind::DirectDriver)?;
            let (classification, plan) = automation.plan(&command.join(" ")).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "classification": classification,
                    "plan": plan,
                }))?
            );
        }
        Mode::Probe { deep } => {
            let mut report = Vec::new();
            for kind in EngineKind::PREFERENCE {
                let available = factory.is_available(kind);
                let healthy = if deep && available {
                    Some(factory.probe(kind, &config.engine).await)
                } else {
                    None
                };
                report.push(json!({"engine": kind, "available": available, "healthy": healthy}));
            }
            let recommended = factory.recommend(&config.engine).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "recommended": recommended,
                    "engines": report,
                }))?
            );
        }
        Mode::Run { command, events } => {
            let (kind, engine) = factory.launch_preferred(&config.engine).await?;
            let shared = engine::shared(engine);
            let automation = app::automation(&config, shared.clone(), kind)?;

            let stop = stop_on_ctrl_c();
            let mut ctx = RunContext::new(stop);
            if events {
                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
                ctx = ctx.with_events(tx);
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{}", line);
                        }
                    }
                });
            }

            let outcome = automation.run(&command.join(" "), &ctx).await;
            close(&shared).await;
            let result = outcome.context("planning failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(2);
            }
        }
        Mode::Repl { file } => {
            let (kind, engine) = factory.launch_preferred(&config.engine).await?;
            let shared = engine::shared(engine);
            let automation = app::automation(&config, shared.clone(), kind)?;
            info!("Session using {} engine", kind);

            let outcome = match file {
                Some(path) => repl::run_file(&automation, &path, &stop_on_ctrl_c()).await,
                None => repl::run_interactive(&automation, &interrupt_on_ctrl_c()).await,
            };
            close(&shared).await;
            outcome?;
        }
    }
    Ok(())
}

/// Ctrl-C asks the running plan to stop at the next step boundary.
fn stop_on_ctrl_c() -> StopSignal {
    let stop = StopSignal::new();
    let signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current step");
            signal.stop();
        }
    });
    stop
}

/// Every Ctrl-C stops the command currently running in the session.
fn interrupt_on_ctrl_c() -> repl::Interrupter {
    let interrupter = repl::Interrupter::default();
    let handle = interrupter.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping the current command after its step");
            handle.interrupt();
        }
    });
    interrupter
}

async fn close(engine: &engine::SharedEngine) {
    if let Err(e) = engine.lock().await.close().await {
        warn!("Failed to close engine: {}", e);
    }
}
