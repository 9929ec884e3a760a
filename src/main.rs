use anyhow::Result;
use colored::*;
use std::sync::Arc;
use std::time::Duration;

use sproutline::config::OrchestratorConfig;
use sproutline::orchestrator::Orchestrator;
use sproutline::pipeline::simulation;
use sproutline::storage::FileStore;

const USAGE: &str = "usage: sproutline [--age <months>] [--offline] <observation text>";

struct CliArgs {
    age_months: u32,
    offline: bool,
    text: String,
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut age_months = 24;
    let mut offline = false;
    let mut text_parts: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--age" => {
                let value = args.get(i + 1).ok_or_else(|| anyhow::anyhow!(USAGE))?;
                age_months = value.parse()?;
                i += 2;
            }
            "--offline" => {
                offline = true;
                i += 1;
            }
            other => {
                text_parts.push(other);
                i += 1;
            }
        }
    }

    if text_parts.is_empty() {
        anyhow::bail!(USAGE);
    }

    Ok(CliArgs {
        age_months,
        offline,
        text: text_parts.join(" "),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    let config = OrchestratorConfig::load()?;
    let storage = Arc::new(FileStore::new(config.storage.dir.clone()));
    let orchestrator = Orchestrator::new(config, storage)?;
    orchestrator.connectivity().set_online(!cli.offline);
    let _watcher = orchestrator.watch_connectivity();

    let result = orchestrator.orchestrate(&cli.text, cli.age_months).await;

    println!(
        "\n{} case {} ({:?} priority, {:.0}% route confidence)",
        "●".blue().bold(),
        result.case_id,
        result.routing.priority,
        result.routing.confidence * 100.0
    );
    println!("  {} {}", "└─".dimmed(), result.routing.rationale.dimmed());

    println!(
        "\n{} offline answer: {} ({:.0}%)",
        "●".yellow().bold(),
        result.offline_result.risk.yellow().bold(),
        result.offline_result.confidence * 100.0
    );
    for finding in &result.offline_result.summary {
        println!("  {} {}", "└─".yellow(), finding);
    }

    let store = orchestrator.store();
    simulation::wait_for_completion(&store, Duration::from_millis(50)).await;

    println!("\n{} pipeline", "●".green().bold());
    let guard = store.lock().await;
    let state = guard.state();
    for id in &state.pipeline {
        if let Some(stage) = state.stage(*id) {
            let line = format!(
                "{:<12} {:?} ({}ms)",
                stage.id.to_string(),
                stage.status,
                stage.duration_ms.unwrap_or(0)
            );
            match &stage.error {
                Some(e) => println!("  {} {} {}", "└─".red(), line.red(), e.red()),
                None => println!("  {} {}", "└─".green(), line),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_age_and_text() {
        let cli = parse_args(&args(&["--age", "18", "not", "walking", "yet"])).unwrap();
        assert_eq!(cli.age_months, 18);
        assert!(!cli.offline);
        assert_eq!(cli.text, "not walking yet");
    }

    #[test]
    fn offline_flag() {
        let cli = parse_args(&args(&["--offline", "few words"])).unwrap();
        assert!(cli.offline);
        assert_eq!(cli.age_months, 24);
    }

    #[test]
    fn missing_text_is_an_error() {
        assert!(parse_args(&args(&["--age", "18"])).is_err());
        assert!(parse_args(&[]).is_err());
    }
}
