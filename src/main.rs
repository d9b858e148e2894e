//! Concierge - Entry Point
//!
//! Modes:
//! - `concierge "<query>"`: answer one request and exit
//! - `concierge`: interactive session (`status`, `metrics`, `quit`)

use clap::Parser;
use concierge::{Config, Orchestrator};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(
    name = "concierge",
    version,
    about = "Discovers, delegates to and synthesizes answers from specialist agents"
)]
struct Cli {
    /// Request to answer; omit for an interactive session
    query: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let interactive = cli.query.is_none();

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "error" => Level::ERROR,
            _ => Level::WARN,
        })
        .unwrap_or(Level::WARN);

    if interactive {
        // Interactive mode - human-readable logs on stderr
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // Single query - stdout carries only the answer, logs go to stderr as JSON
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = Config::from_env()?;
    let mut orchestrator = Orchestrator::new(config)?;

    match cli.query {
        Some(query) => {
            let answer = orchestrator.process_request(&query).await;
            println!("{}", answer);
            orchestrator.shutdown();
        }
        None => run_interactive(&mut orchestrator).await?,
    }

    Ok(())
}

async fn run_interactive(orchestrator: &mut Orchestrator) -> anyhow::Result<()> {
    info!("Concierge v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Concierge v{} - ask anything, or type status, metrics, quit",
        env!("CARGO_PKG_VERSION")
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match line.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "status" => println!("{}", orchestrator.status()),
            "metrics" => {
                println!("{}", serde_json::to_string_pretty(&orchestrator.status().usage)?)
            }
            query => {
                let answer = orchestrator.process_request(query).await;
                println!("\n{}", answer);
            }
        }
    }

    let summary = orchestrator.shutdown();
    println!("\nSession ended.\n{}", summary);
    Ok(())
}
