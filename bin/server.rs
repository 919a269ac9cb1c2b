// TrackML Pipeline - serving placeholder
// Usage: trackml-server [SECONDS]
// Without SECONDS it runs until Ctrl+C.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use trackml_pipeline::config::{ImageConfig, PipelineConfig};
use trackml_pipeline::server::{serve, AppState, DEFAULT_ADDR};
use trackml_pipeline::stages::sleep_duration;

#[derive(Parser, Debug)]
#[command(
    name = "trackml-server",
    version,
    about = "TrackML serving placeholder: REST API over the input events"
)]
struct Args {
    /// Seconds to serve before shutting down (default: until Ctrl+C)
    seconds: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let lifetime = args.seconds.map(|s| sleep_duration(Some(s))).transpose()?;

    let config = PipelineConfig::from_env()?;
    let images = ImageConfig::from_env();
    let addr = std::env::var("TRACKML_SERVE_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());

    println!("🌐 TrackML serving placeholder");
    println!("   events: {}", config.input_dir.display());
    println!("   API:    http://{}/api/health", addr);

    serve(&addr, AppState::new(config, images), shutdown_signal(lifetime)).await?;

    println!("✓ Server stopped");
    Ok(())
}

async fn shutdown_signal(lifetime: Option<Duration>) {
    match lifetime {
        Some(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => log::info!("serving window elapsed"),
                _ = tokio::signal::ctrl_c() => log::info!("interrupted"),
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("failed to listen for Ctrl+C: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_optional_lifetime() {
        assert_eq!(Args::try_parse_from(["trackml-server"]).unwrap().seconds, None);
        assert_eq!(
            Args::try_parse_from(["trackml-server", "2.5"]).unwrap().seconds,
            Some(2.5)
        );
        assert!(Args::try_parse_from(["trackml-server", "soon"]).is_err());
    }

    #[test]
    fn test_help_and_version_are_not_lifetimes() {
        let help = Args::try_parse_from(["trackml-server", "--help"]).unwrap_err();
        assert_eq!(help.kind(), clap::error::ErrorKind::DisplayHelp);

        let version = Args::try_parse_from(["trackml-server", "--version"]).unwrap_err();
        assert_eq!(version.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
