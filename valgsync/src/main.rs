use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use valgsync::config::Config;
use valgsync::runner::MirrorRunner;

const DEFAULT_CONFIG_PATH: &str = "valgsync.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run { config: PathBuf },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut config = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                config = PathBuf::from(value);
            }
            "--help" | "-h" => return Ok(CliMode::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(CliMode::Run { config })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: valgsync [--config PATH]");
            println!("  --config, -c PATH   Config file (default: {DEFAULT_CONFIG_PATH})");
            return Ok(());
        }
        CliMode::Run { config } => Config::load(&config)?,
    };

    let report = MirrorRunner::new(config).run().await;
    info!(
        synced = report.synced,
        failed = report.failed,
        "mirror run complete"
    );
    if report.failed > 0 {
        for file in &report.failed_files {
            warn!(file = %file, "not synchronized");
        }
        anyhow::bail!("{} file(s) failed to synchronize", report.failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(vec!["valgsync".to_string()]).unwrap();
        assert_eq!(
            mode,
            CliMode::Run {
                config: PathBuf::from(DEFAULT_CONFIG_PATH)
            }
        );
    }

    #[test]
    fn parse_cli_mode_accepts_config_path() {
        let mode = parse_cli_mode(
            ["valgsync", "-c", "other.toml"]
                .into_iter()
                .map(String::from),
        )
        .unwrap();
        assert_eq!(
            mode,
            CliMode::Run {
                config: PathBuf::from("other.toml")
            }
        );
    }

    #[test]
    fn parse_cli_mode_supports_help() {
        let mode = parse_cli_mode(
            ["valgsync", "--help"].into_iter().map(String::from),
        )
        .unwrap();
        assert_eq!(mode, CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_arguments() {
        assert!(
            parse_cli_mode(["valgsync", "--nope"].into_iter().map(String::from)).is_err()
        );
    }
}
