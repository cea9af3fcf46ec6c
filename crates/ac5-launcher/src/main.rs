//! Operator launcher: discovers every instance directory under a root
//! folder and runs its login, auth, and game services in-process.
//!
//! Stands in for the teacher's iced GUI launcher, which exists to launch
//! the *game client* against a chosen server — this tool runs the
//! *servers* themselves, one instance per subdirectory, each with its own
//! `config.json` and key files, so an operator can host several game
//! instances (different `game_type`s, different ports) from one process.

use std::path::{Path, PathBuf};

use ac5_common::config::Config;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Runs every AC5 server instance found under a root directory")]
struct Args {
    /// Directory containing one subdirectory per instance, each with its
    /// own config.json (created with defaults on first run).
    #[arg(long, default_value = "instances")]
    instances_root: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let instances = discover_instances(&args.instances_root)?;
    if instances.is_empty() {
        warn!(root = %args.instances_root.display(), "no instance directories found");
        return Ok(());
    }

    let mut tasks = Vec::new();
    for instance_dir in instances {
        let config = Config::load(&instance_dir.join("config.json"))
            .with_context(|| format!("loading config for instance {}", instance_dir.display()))?;
        info!(instance = %instance_dir.display(), login_port = config.login_port, auth_port = config.auth_port, "starting instance");

        let private_key = ac5_common::keys::load_or_generate(&instance_dir.join(&config.private_key_path))
            .with_context(|| format!("loading keys for instance {}", instance_dir.display()))?;

        let login_config = config.clone();
        let login_key = private_key.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = ac5_login::run(login_config, login_key).await {
                error!(error = %e, "login service exited");
            }
        }));

        tasks.push(tokio::spawn(async move {
            if let Err(e) = ac5_auth::run(config, private_key).await {
                error!(error = %e, "auth service exited");
            }
        }));
    }

    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

/// An instance directory is any immediate subdirectory of `root` that
/// either already has a `config.json` or doesn't yet exist at all — the
/// root itself is created if missing, but individual instance directories
/// are operator-managed and never invented by this tool.
fn discover_instances(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        warn!(root = %root.display(), "instances root does not exist");
        return Ok(Vec::new());
    }

    let mut instances = Vec::new();
    for entry in std::fs::read_dir(root).with_context(|| format!("reading {}", root.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            instances.push(entry.path());
        }
    }
    instances.sort();
    Ok(instances)
}
