use crate::cli::Cli;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

/// Settings shared by the gateway, the stopwatch registry and the orchestrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    pub user_agent: String,
    /// Where exported blobs are saved.
    pub download_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            tick_interval: crate::stopwatch::DEFAULT_TICK,
            user_agent: default_user_agent(),
            download_dir: default_download_dir(),
        }
    }
}

pub fn default_user_agent() -> String {
    format!("student-pipeline-cli/{}", env!("CARGO_PKG_VERSION"))
}

/// The user's Downloads folder, or the working directory when there is none.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Build a `PipelineConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> PipelineConfig {
    PipelineConfig {
        base_url: args.base_url.trim_end_matches('/').to_string(),
        tick_interval: Duration::from(args.tick),
        user_agent: default_user_agent(),
        download_dir: args
            .download_dir
            .clone()
            .unwrap_or_else(default_download_dir),
    }
}
