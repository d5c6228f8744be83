//! hostd - operator entry point for the bothost runtime
//!
//! Registers workers, starts and supervises them in the foreground, and
//! exposes the resolver and preparer for one-off use.

mod cli;
mod state;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bh_core::{Worker, WorkerId, WorkerRepository};
use dep_resolver::{discover_stdlib_dir, merge_requirements, DependencyResolver, REQUIREMENTS_FILE_NAME};
use worker_runner::{SourcePreparer, SupervisorConfig};

use crate::cli::{Cli, Commands, EnvAction};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hostd=info,worker_runner=info,dep_resolver=info,bh_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli {
        data_dir,
        workers_root,
        command,
    } = Cli::parse();
    let config = SupervisorConfig::from_env();

    match command {
        Commands::Resolve(args) => {
            let mut resolver = DependencyResolver::new();
            if let Some(dir) = discover_stdlib_dir(&config.python).await {
                resolver = resolver.with_stdlib_dir(dir);
            }
            let resolution = resolver
                .resolve(&args.source_dir)
                .with_context(|| format!("Failed to resolve {:?}", args.source_dir))?;

            for dependency in &resolution.dependencies {
                println!("{dependency}");
            }
            for (path, message) in &resolution.skipped_files {
                eprintln!("skipped {}: {}", path.display(), message);
            }
            if args.merge {
                let path = args.source_dir.join(REQUIREMENTS_FILE_NAME);
                let added = merge_requirements(&path, &resolution.dependencies)
                    .with_context(|| format!("Failed to update {path:?}"))?;
                eprintln!("added {} package(s) to {}", added.len(), path.display());
            }
        }

        Commands::Prepare(args) => {
            let report = SourcePreparer::new(config.preparer.clone())
                .prepare(&args.entry, &args.credential)
                .with_context(|| format!("Failed to prepare {:?}", args.entry))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Add(args) => {
            let state = open_state(&data_dir, workers_root, config).await?;
            let source_dir = args
                .source_dir
                .unwrap_or_else(|| state.workers_root().join(&args.id));
            tokio::fs::create_dir_all(&source_dir)
                .await
                .with_context(|| format!("Failed to create {source_dir:?}"))?;

            let mut worker = Worker::new(args.id.as_str(), source_dir, args.credential);
            if let Some(name) = args.name {
                worker = worker.with_name(name);
            }
            if let Some(owner) = args.owner {
                worker = worker.with_owner(owner);
            }
            let worker = state.store().create(worker).await?;
            println!("added worker {} at {}", worker.id, worker.source_dir.display());
        }

        Commands::Run(args) => {
            let state = open_state(&data_dir, workers_root, config).await?;
            let host = state.host();

            let mut started = 0;
            for id in args.ids.iter().map(|id| WorkerId::from(id.as_str())) {
                match host.start_worker(&id).await {
                    Ok(report) => {
                        started += 1;
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    }
                    Err(e) => {
                        tracing::error!(worker_id = %id, error = %e, "start failed");
                        eprintln!("{id}: {e}");
                    }
                }
            }
            if started == 0 {
                bail!("no worker started");
            }

            tracing::info!(started, "supervising; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;

            for (id, result) in host.supervisor().shutdown().await {
                match result {
                    Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                    Err(e) => eprintln!("{id}: {e}"),
                }
            }
            let changed = host.reconcile().await?;
            tracing::info!(changed = changed.len(), "statuses reconciled");
        }

        Commands::Logs(args) => {
            let state = open_state(&data_dir, workers_root, config).await?;
            let tail = state
                .host()
                .worker_logs(&WorkerId::from(args.id.as_str()), args.lines)
                .await?;
            println!("{tail}");
        }

        Commands::Status => {
            let state = open_state(&data_dir, workers_root, config).await?;
            for worker in state.store().list().await? {
                let owner = worker
                    .owner_id
                    .map(|owner| owner.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<12} {:<8} {:<20} owner={} env={} {}",
                    worker.id.as_str(),
                    worker.status.as_str(),
                    worker.name,
                    owner,
                    worker.env.len(),
                    worker.source_dir.display()
                );
            }
        }

        Commands::Env(args) => {
            let state = open_state(&data_dir, workers_root, config).await?;
            let id = WorkerId::from(args.id.as_str());
            match args.action {
                EnvAction::Set { key, value } => {
                    let worker = state.host().set_env_var(&id, &key, &value).await?;
                    println!("{id}: {} variable(s) set", worker.env.len());
                }
                EnvAction::Unset { key } => {
                    if !state.host().remove_env_var(&id, &key).await? {
                        eprintln!("{id}: {key} was not set");
                    }
                }
            }
        }

        Commands::Remove(args) => {
            let state = open_state(&data_dir, workers_root, config).await?;
            state
                .host()
                .remove_worker(&WorkerId::from(args.id.as_str()))
                .await?;
            println!("removed worker {}", args.id);
        }
    }

    Ok(())
}

async fn open_state(
    data_dir: &Path,
    workers_root: PathBuf,
    config: SupervisorConfig,
) -> anyhow::Result<AppState> {
    tracing::debug!("Using data directory: {:?}", data_dir);
    AppState::new(data_dir, workers_root, config)
        .await
        .with_context(|| format!("Failed to open worker store in {data_dir:?}"))
}
