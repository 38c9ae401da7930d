//! hodei-steps-runner - run a command in a local container under a health monitor
//!
//! ```text
//! hodei-steps-runner --root ./app -- ./server --port 8080
//! hodei-steps-runner --healthcheck "nc -z localhost 8080" -e PORT=8080 -- ./server
//! ```
//!
//! The command and the health monitor are codependent: whichever stops
//! first takes the other down. Ctrl-C cancels both.

use clap::Parser;
use hodei_steps_core::{
    BufferStreamer, CodependentStep, Container, MonitorStep, OutputWrapperStep, ProbeFactory,
    ProcessSpec, RunStep, SharedBuffer, SharedStep, StepEnvironment, StepError, StepResult,
    StepsConfig, TracingStreamer,
};
use hodei_steps_local::LocalContainer;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hodei-steps-runner")]
#[command(about = "Run a command under a health monitor", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory backing the container filesystem
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Working directory inside the container
    #[arg(long)]
    dir: Option<String>,

    /// Environment variable for the command (KEY=VALUE), repeatable
    #[arg(short, long = "env", value_parser = parse_env_var)]
    env: Vec<(String, String)>,

    /// Health check script, run through /bin/sh -c
    #[arg(long)]
    healthcheck: Option<String>,

    /// Treat a successful exit of the command as a failure
    #[arg(long)]
    error_on_exit: bool,

    /// Command and arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

fn parse_env_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{}`", raw)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => {
            info!("command finished");
            ExitCode::SUCCESS
        }
        Err(err) if err.is_cancelled() => {
            warn!("interrupted");
            ExitCode::from(130)
        }
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> StepResult {
    let env = StepEnvironment::from_config(StepsConfig::from_env())?;
    info!(config = ?env.config, root = %cli.root.display(), "starting runner");

    let container: Arc<dyn Container> = Arc::new(LocalContainer::new(cli.root.clone()));
    let (healthy_tx, mut healthy_rx) = mpsc::channel(1);
    let root = build_tree(&cli, container, &env, healthy_tx)?;

    tokio::spawn(async move {
        while healthy_rx.recv().await.is_some() {
            info!("instance is healthy");
        }
    });

    perform_until(&root, interrupted()).await
}

/// Resolves on Ctrl-C. Never resolves if the signal cannot be watched.
async fn interrupted() {
    if let Err(err) = signal::ctrl_c().await {
        error!("unable to listen for interrupt: {}", err);
        std::future::pending::<()>().await;
    }
}

/// Perform `root`, cancelling it once `interrupt` resolves.
///
/// An interrupted run always reports [`StepError::Cancelled`]: composite
/// roots may swallow cancellation of their members.
async fn perform_until(root: &SharedStep, interrupt: impl Future<Output = ()>) -> StepResult {
    let perform = root.perform();
    tokio::pin!(perform);

    tokio::select! {
        result = &mut perform => result,
        () = interrupt => {
            info!("interrupt received, cancelling");
            root.cancel();
            match perform.await {
                Err(err) if !err.is_cancelled() => warn!(error = %err, "error while cancelling"),
                _ => {}
            }
            Err(StepError::Cancelled)
        }
    }
}

/// Assemble `Codependent([Run(command), Monitor(OutputWrapper(Run(healthcheck)))])`,
/// or just the command when no health check is configured.
fn build_tree(
    cli: &Cli,
    container: Arc<dyn Container>,
    env: &StepEnvironment,
    healthy: mpsc::Sender<()>,
) -> Result<SharedStep, StepError> {
    let (program, args) = cli
        .command
        .split_first()
        .ok_or_else(|| StepError::configuration("no command given"))?;

    let mut spec = ProcessSpec::new(program.clone()).with_args(args);
    if let Some(dir) = &cli.dir {
        spec = spec.with_dir(dir.clone());
    }
    for (key, value) in &cli.env {
        spec = spec.with_env(key.clone(), value.clone());
    }

    let action: SharedStep = Arc::new(RunStep::new(
        container.clone(),
        spec,
        Arc::new(TracingStreamer::new("APP")),
        env.clock.clone(),
    ));

    let Some(healthcheck) = cli.healthcheck.clone() else {
        return Ok(action);
    };

    let probes: ProbeFactory = {
        let clock = env.clock.clone();
        let dir = cli.dir.clone();
        Box::new(move || {
            let output = SharedBuffer::new();
            let mut spec = ProcessSpec::new("/bin/sh").with_args(["-c", healthcheck.as_str()]);
            if let Some(dir) = &dir {
                spec = spec.with_dir(dir.clone());
            }
            let probe = RunStep::new(
                container.clone(),
                spec,
                Arc::new(BufferStreamer::new(output.clone()).with_source_name("HEALTH")),
                clock.clone(),
            )
            .with_suppressed_exit_status();
            Arc::new(OutputWrapperStep::new(Arc::new(probe), Box::new(output))) as SharedStep
        })
    };

    let monitor: SharedStep = Arc::new(MonitorStep::new(
        probes,
        healthy,
        Arc::new(TracingStreamer::new("HEALTH")),
        env.clock.clone(),
        env.config.start_timeout,
        env.config.healthy_interval,
        env.config.unhealthy_interval,
        env.work_pool.clone(),
    ));

    Ok(Arc::new(CodependentStep::new(
        vec![action, monitor],
        cli.error_on_exit,
    )))
}
