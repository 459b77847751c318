use anyhow::{Context, Result};
use clap::Parser;
use jupyter_tunnel::cli::Cli;
use jupyter_tunnel::config::Config;
use jupyter_tunnel::logging::init_logging;
use jupyter_tunnel::orchestrator::{Collaborators, Console, SessionOrchestrator};
use jupyter_tunnel::shutdown::SignalListener;
use jupyter_tunnel::WorkflowError;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
    .context("failed to load configuration")?;
    cli.apply(&mut config);
    config.validate()?;

    let collaborators = Collaborators::system(&config);
    let mut orchestrator = SessionOrchestrator::new(config, collaborators, Console::stdout());

    // before the prompt opens, so a signal while typing still closes it
    let mut signals = SignalListener::register().context("failed to install signal handlers")?;
    let outcome = tokio::select! {
        result = orchestrator.run() => result.map(|exit| {
            tracing::info!(?exit, "hand-off finished");
        }),
        signal = signals.recv() => Err(WorkflowError::Interrupted(signal)),
    };

    orchestrator.cleanup();
    Ok(match outcome {
        Ok(()) => 0,
        Err(e) => report(&e),
    })
}

fn report(error: &WorkflowError) -> i32 {
    // the terminal may still be in raw mode's aftermath, start a fresh line
    eprintln!("\r\nError: {}", error);
    error.exit_code()
}
