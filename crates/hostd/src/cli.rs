//! Command-line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Operator tool for hosting worker projects
#[derive(Parser, Debug)]
#[command(name = "hostd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the worker store
    #[arg(long, env = "BOTHOST_DATA_DIR", default_value = ".bothost")]
    pub data_dir: PathBuf,

    /// Directory new workers' sources are placed under
    #[arg(long, env = "BOTHOST_WORKERS_ROOT", default_value = "hosted_workers")]
    pub workers_root: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the packages a source tree needs
    Resolve(ResolveArgs),

    /// Normalize and patch an entry file in place
    Prepare(PrepareArgs),

    /// Register a worker in the store
    Add(AddArgs),

    /// Start workers and supervise them until interrupted
    Run(RunArgs),

    /// Show the tail of a worker log
    Logs(LogsArgs),

    /// List stored workers
    Status,

    /// Set or unset a worker environment variable
    Env(EnvArgs),

    /// Delete a worker, its sources and its record
    Remove(RemoveArgs),
}

#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Source directory to scan
    pub source_dir: PathBuf,

    /// Append new packages to the directory's requirements.txt
    #[arg(long)]
    pub merge: bool,
}

#[derive(Parser, Debug)]
pub struct PrepareArgs {
    /// Entry file to rewrite
    pub entry: PathBuf,

    /// Credential to inject
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub credential: String,
}

#[derive(Parser, Debug)]
pub struct AddArgs {
    pub id: String,

    /// Source directory; defaults to <workers-root>/<id>
    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    #[arg(long)]
    pub credential: String,

    #[arg(long)]
    pub name: Option<String>,

    /// Front-end user that owns the worker
    #[arg(long)]
    pub owner: Option<i64>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Worker ids to start
    #[arg(required = true)]
    pub ids: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct LogsArgs {
    pub id: String,

    /// Number of lines
    #[arg(short = 'n', long, default_value_t = 20)]
    pub lines: usize,
}

#[derive(Parser, Debug)]
pub struct EnvArgs {
    pub id: String,

    #[command(subcommand)]
    pub action: EnvAction,
}

#[derive(Subcommand, Debug)]
pub enum EnvAction {
    Set { key: String, value: String },
    Unset { key: String },
}

#[derive(Parser, Debug)]
pub struct RemoveArgs {
    pub id: String,
}
