mod access_log;
mod cache_store;
mod cli;
mod instance_lock;
mod pass;
mod policy;
mod restart;
mod scheduler;
mod settings;
mod usage;
mod window;
mod xray_config;

use anyhow::{Context, Result};
use cache_store::CacheStore;
use chrono::Utc;
use clap::Parser;
use cli::{Cli, Command, PolicyArgs};
use instance_lock::InstanceLock;
use pass::PolicyPass;
use restart::{CommandRestart, RestartSignal};
use scheduler::Scheduler;
use settings::GuardPaths;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let paths = GuardPaths::from_env()?;
    match cli.command {
        Some(Command::Usage { rebuild, user }) => {
            // A running scheduler owns the caches; fall back to reading them.
            let lock = InstanceLock::try_acquire(&paths.cache_dir)?;
            print_usage(&paths, rebuild, user.as_deref(), lock.is_some()).await
        }
        None => {
            let lock = InstanceLock::acquire(&paths.cache_dir)?;
            tracing::debug!(lock = %lock.path().display(), "Instance lock acquired");
            run_policy(paths, &cli.policy).await
        }
    }
}

async fn print_usage(
    paths: &GuardPaths,
    rebuild: bool,
    user: Option<&str>,
    exclusive: bool,
) -> Result<()> {
    let store = CacheStore::new(paths.cache_dir.clone());
    let usage = usage::current_usage(&store, &paths.access_log, rebuild, exclusive).await?;

    let output = match user {
        Some(user) => {
            let record = usage
                .get(user)
                .with_context(|| format!("No usage recorded for {}", user))?;
            serde_json::to_string_pretty(record)?
        }
        None => {
            if usage.is_empty() {
                tracing::warn!(log = %paths.access_log.display(), "No usage recorded yet");
            }
            let records: Vec<_> = usage.snapshot().into_values().collect();
            serde_json::to_string_pretty(&records)?
        }
    };
    println!("{}", output);
    Ok(())
}

async fn run_policy(paths: GuardPaths, args: &PolicyArgs) -> Result<()> {
    let options = args.pass_options();
    let command = CommandRestart::from_command_line(&paths.restart_command)?;
    if !options.dry_run {
        command.resolve_program()?;
    }
    let restart: Arc<dyn RestartSignal> = Arc::new(command);
    tracing::info!(
        config = %paths.config.display(),
        access_log = %paths.access_log.display(),
        cache = %paths.cache_dir.display(),
        dry_run = options.dry_run,
        "Starting xray-guard"
    );

    let pass = Arc::new(PolicyPass::new(paths, options, restart));
    let scheduler = Scheduler::new(args.delay);
    if let Some(delay) = scheduler.delay() {
        tracing::info!("Running a pass every {} minutes", delay.as_secs() / 60);
    }

    let (stop_tx, stop_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            tracing::warn!("Failed to listen for shutdown signals: {:#}", e);
            // Keeps the scheduler running without signal handling.
            std::future::pending::<()>().await;
        }
        // Receiver gone means the scheduler already finished
        let _ = stop_tx.send(()).await;
    });

    let passes = scheduler
        .run(
            move || {
                let pass = Arc::clone(&pass);
                async move { pass.run(Utc::now()).await }
            },
            stop_rx,
        )
        .await;
    tracing::info!(passes, "Scheduler stopped");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown signal received, finishing current pass");
    Ok(())
}
