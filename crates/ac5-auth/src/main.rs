use std::path::PathBuf;

use ac5_common::config::Config;
use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "AC5 authentication and game-session server")]
struct Args {
    /// Directory holding this instance's config.json and key files.
    #[arg(long, default_value = ".")]
    instance_dir: PathBuf,
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
    let config = Config::load(&args.instance_dir.join("config.json"))?;
    let private_key = ac5_common::keys::load_or_generate(&args.instance_dir.join(&config.private_key_path))?;
    ac5_auth::run(config, private_key).await
}
