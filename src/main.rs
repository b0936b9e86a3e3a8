use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use concourse::api;
use concourse::Config;

/// Concourse - omnichannel conversation routing engine
#[derive(Parser)]
#[command(name = "concourse", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, env = "CONCOURSE_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,concourse=info",
        1 => "info,concourse=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    tracing::info!(
        port = config.port,
        model_nlu = config.llm.use_model_nlu,
        auto_commit = config.scheduling.auto_commit,
        "starting concourse"
    );

    let state = api::ApiState::build(config)?;
    api::serve(state).await?;

    Ok(())
}
