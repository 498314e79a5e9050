//! Line-oriented sessions: one natural-language command per line.

use std::io::{self, Write};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use wayline_engine::Automation;
use wayline_engine::runner::{RunContext, StopSignal};

const EXIT_COMMANDS: &[&str] = &["exit", "quit"];

/// Hands out a fresh stop signal per command. An interrupt stops only the
/// command that is running, so the session survives it.
#[derive(Debug, Clone)]
pub struct Interrupter {
    current: watch::Sender<StopSignal>,
}

impl Default for Interrupter {
    fn default() -> Self {
        Self {
            current: watch::Sender::new(StopSignal::new()),
        }
    }
}

impl Interrupter {
    pub fn next_command(&self) -> StopSignal {
        let stop = StopSignal::new();
        self.current.send_replace(stop.clone());
        stop
    }

    pub fn interrupt(&self) {
        self.current.borrow().stop();
    }
}

/// What a single input line asks for.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Skip,
    Exit,
    /// `plan <command>` prints the plan without executing it.
    Plan(&'a str),
    Run(&'a str),
}

fn classify(line: &str) -> Line<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Line::Skip;
    }
    if EXIT_COMMANDS.contains(&trimmed) {
        return Line::Exit;
    }
    match trimmed.strip_prefix("plan ") {
        Some(rest) if !rest.trim().is_empty() => Line::Plan(rest.trim()),
        _ => Line::Run(trimmed),
    }
}

async fn execute(automation: &Automation, line: Line<'_>, stop: &StopSignal) -> Result<String, String> {
    match line {
        Line::Plan(command) => {
            let (_, plan) = automation.plan(command).await.map_err(|e| e.to_string())?;
            serde_json::to_string_pretty(&plan).map_err(|e| e.to_string())
        }
        Line::Run(command) => {
            let ctx = RunContext::new(stop.clone());
            let result = automation
                .run(command, &ctx)
                .await
                .map_err(|e| e.to_string())?;
            let mut out = result.summary();
            for error in &result.errors {
                out.push_str(&format!("\n  - {}", error));
            }
            for item in &result.extracted_data {
                out.push_str(&format!("\n  {}", item.content));
            }
            Ok(out)
        }
        Line::Skip | Line::Exit => Ok(String::new()),
    }
}

/// Runs each line of `path` in order, stopping at the first failure.
pub async fn run_file(automation: &Automation, path: &Path, stop: &StopSignal) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(path).await?;
    for (number, raw) in content.lines().enumerate() {
        let line = classify(raw);
        match line {
            Line::Skip => continue,
            Line::Exit => break,
            _ => {}
        }
        if stop.is_stopped() {
            break;
        }
        match execute(automation, line, stop).await {
            Ok(output) => println!("{}", output),
            Err(err) => {
                anyhow::bail!("Error executing line {} '{}': {}", number + 1, raw.trim(), err);
            }
        }
    }
    Ok(())
}

pub async fn run_interactive(automation: &Automation, interrupter: &Interrupter) -> anyhow::Result<()> {
    println!("Enter a command (e.g. 'find flights from London to Mumbai').");
    println!("Prefix with 'plan' to preview the plan. Type 'exit' or 'quit' to close.");
    println!("Ctrl-C stops the running command.");

    let mut reader = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let Some(input) = reader.next_line().await? else {
            break;
        };
        let line = classify(&input);
        match line {
            Line::Skip => continue,
            Line::Exit => break,
            _ => match execute(automation, line, &interrupter.next_command()).await {
                Ok(output) => println!("{}", output),
                Err(err) => eprintln!("Error: {}", err),
            },
        }
    }
    Ok(())
}
