use std::process::ExitCode;

use finadvisor::config::PipelineConfig;
use finadvisor::error::Result;
use finadvisor::pipeline::types::DeliveryResult;

const EXIT_PIPELINE_ERROR: u8 = 1;
const EXIT_DELIVERY_FAILED: u8 = 2;

enum Command {
    Run,
    Send(String),
}

fn parse_command() -> anyhow::Result<Command> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None | Some("run") => Ok(Command::Run),
        Some("send") => {
            let message = args.collect::<Vec<_>>().join(" ");
            if message.trim().is_empty() {
                anyhow::bail!("usage: finadvisor send <message>");
            }
            Ok(Command::Send(message))
        }
        Some(other) => anyhow::bail!("unknown command '{other}' (expected 'run' or 'send')"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let outcome = match parse_command() {
        Ok(command) => run(command).await.map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(delivery) if delivery.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(EXIT_DELIVERY_FAILED),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_PIPELINE_ERROR)
        }
    }
}

async fn run(command: Command) -> Result<DeliveryResult> {
    let config = PipelineConfig::from_env()?;

    eprintln!("💸 Finadvisor v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Ledger: {} ({})", config.ledger.collection, config.db_path.display());
    eprintln!("   Recipients: {}", config.recipients.len());

    let today = chrono::Local::now().date_naive();
    let pipeline = config.build_pipeline(today).await?;

    // ── Execute ──────────────────────────────────────────────────────────
    let delivery = match command {
        Command::Send(message) => pipeline.send_advice(&message, &config.recipients).await,
        Command::Run => {
            let report = pipeline
                .run(&config.dataset, &config.ledger, &config.recipients)
                .await?;
            eprintln!(
                "   Run {}: fetched {}, new {}, persisted {}",
                report.run_id, report.fetched, report.new_transactions, report.persisted
            );
            if let Some(advice) = &report.advice {
                eprintln!("   Advice: {advice}");
            }
            match report.delivery {
                Some(delivery) => delivery,
                None => {
                    eprintln!("   Nothing new; notification skipped");
                    return Ok(DeliveryResult::default());
                }
            }
        }
    };

    eprintln!("   {}", delivery.summary());
    Ok(delivery)
}
