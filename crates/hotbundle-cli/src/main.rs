use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod completion;
mod dispatch;
mod host;
mod render;

use completion::CliCompletionShell;
use host::DEFAULT_CONFIG_FILE;

#[derive(Parser, Debug)]
#[command(name = "hotbundle")]
#[command(about = "Over-the-air bundle updates for installed apps", long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Overrides `root_dir` from the config file.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Check {
        #[arg(long = "extra", value_name = "KEY=VALUE")]
        extra: Vec<String>,
    },
    Download {
        #[arg(long = "extra", value_name = "KEY=VALUE")]
        extra: Vec<String>,
        #[arg(long, value_enum)]
        switch: Option<SwitchMode>,
    },
    Switch {
        hash: String,
        #[arg(long)]
        now: bool,
    },
    MarkSuccess,
    ClearRollback,
    Resolve,
    Status {
        #[arg(long)]
        json: bool,
    },
    Cleanup,
    FetchPackage {
        url: String,
        #[arg(long)]
        file_name: Option<String>,
    },
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum SwitchMode {
    Now,
    Restart,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    dispatch::run_cli(cli).await
}

#[cfg(test)]
mod tests;
