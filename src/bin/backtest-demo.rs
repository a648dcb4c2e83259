use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradewerk::{
    Navigator, RunConfig, RunEvent, RunOrchestrator, ScriptedBacktestService, ScriptedStep,
};

/// Submit a built-in template strategy against the scripted in-memory
/// backend and print the run's event log.
#[derive(Parser, Debug)]
#[command(name = "backtest-demo")]
struct Args {
    /// Template id to submit (see `--list`).
    #[arg(long, default_value = "demo-rsi-reversion")]
    template: String,

    /// List available templates and exit.
    #[arg(long)]
    list: bool,

    /// Symbol to backtest.
    #[arg(long, default_value = "SPY")]
    symbol: String,

    /// Script the run to fail with this backend message instead of
    /// completing, to exercise failure classification.
    #[arg(long)]
    fail_with: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list {
        for template in Navigator::templates() {
            println!("{}  {} — {}", template.id, template.name, template.description);
        }
        return;
    }

    let Some(template) = Navigator::templates()
        .iter()
        .find(|template| template.id == args.template)
    else {
        eprintln!("unknown template {:?}; try --list", args.template);
        std::process::exit(1);
    };

    let service = Arc::new(ScriptedBacktestService::new());
    match &args.fail_with {
        Some(message) => service.script_next_run(vec![
            ScriptedStep::running(35.0),
            ScriptedStep::failed(message.clone()),
        ]),
        None => service.script_next_run(vec![
            ScriptedStep::running(20.0),
            ScriptedStep::running(65.0),
            ScriptedStep::completed(),
        ]),
    }

    let (orchestrator, mut events) = RunOrchestrator::with_timing(
        service.clone(),
        Duration::from_millis(200),
        Duration::from_secs(30),
    );

    let config = RunConfig {
        symbol: args.symbol.clone(),
        ..RunConfig::default()
    };

    let submission = match orchestrator.submit(template, config).await {
        Ok(submission) => submission,
        Err(err) => {
            eprintln!("submit failed: {err}");
            std::process::exit(1);
        }
    };
    println!(
        "submitted {} against graph {}",
        submission.run.id, submission.run.graph_id
    );
    orchestrator.join(&submission.run.id).await;

    while let Ok(event) = events.try_recv() {
        match event {
            RunEvent::GraphMaterialized {
                template_id,
                graph_id,
            } => println!("materialized {template_id} -> {graph_id}"),
            RunEvent::Submitted { run_id, graph_id } => {
                println!("queued {run_id} on {graph_id}")
            }
            RunEvent::Progress { run_id, progress } => {
                println!("{run_id}: {progress:.0}%")
            }
            RunEvent::Completed { run_id, metrics } => {
                println!("{run_id}: completed");
                if let Some(metrics) = metrics {
                    println!(
                        "  return {:+.1}%  trades {}  win rate {:.0}%  sharpe {:.2}  drawdown {:.1}%",
                        metrics.total_return * 100.0,
                        metrics.trade_count,
                        metrics.win_rate * 100.0,
                        metrics.sharpe,
                        metrics.max_drawdown * 100.0
                    );
                }
            }
            RunEvent::Failed {
                run_id,
                category,
                raw,
                correlation,
            } => {
                println!("{run_id}: failed [{correlation}]");
                println!("  {}", category.user_message());
                println!("  backend said: {raw}");
            }
            RunEvent::ObservationTimedOut { run_id } => {
                println!("{run_id}: stopped watching (still running server-side)")
            }
        }
    }
}
