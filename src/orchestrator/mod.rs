//! Pipeline-stage orchestration.
//!
//! Each stage pairs one named stopwatch with one gateway call behind a
//! single-flight guard, and publishes its operation state for presentation
//! layers. `PipelineSession` wires the four stages to one shared stopwatch
//! registry and tears them down together.

mod report;
mod runner;
mod stages;

#[cfg(test)]
pub(crate) mod mock;

pub use report::ReportOrchestrator;
pub use runner::{OperationStatus, PipelineOperation, StageRunner, TriggerOutcome};
pub use stages::{ConvertOrchestrator, GenerateOrchestrator, IngestOrchestrator};

use crate::config::PipelineConfig;
use crate::gateway::{GatewayError, HttpGateway, TransferGateway};
use crate::stopwatch::StopwatchRegistry;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A discrete pipeline step, each timed by its own stopwatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Generate,
    Convert,
    Ingest,
    ReportLoad,
    ReportExport,
}

impl Stage {
    pub fn stopwatch_name(self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::Convert => "process",
            Stage::Ingest => "upload",
            Stage::ReportLoad => "report-load",
            Stage::ReportExport => "report-export",
        }
    }

    /// Message shown when a request fails without a server-supplied reason.
    pub fn fallback_message(self) -> &'static str {
        match self {
            Stage::Generate => "Generation failed",
            Stage::Convert => "Processing failed",
            Stage::Ingest => "Upload failed",
            Stage::ReportLoad => "Failed to load students",
            Stage::ReportExport => "Export failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stopwatch_name())
    }
}

/// Why a stage request failed once it was issued.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("failed to save {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    /// The remote message when the service sent one, otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            StageError::Gateway(e) => e.remote_message().unwrap_or(fallback).to_string(),
            StageError::Save { .. } => fallback.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            StageError::Gateway(e) => e.status(),
            StageError::Save { .. } => None,
        }
    }
}

/// All four stage orchestrators sharing one stopwatch registry.
pub struct PipelineSession {
    pub registry: Arc<StopwatchRegistry>,
    pub generate: GenerateOrchestrator,
    pub convert: ConvertOrchestrator,
    pub ingest: IngestOrchestrator,
    pub report: ReportOrchestrator,
}

impl PipelineSession {
    /// Session backed by the HTTP gateway described by `cfg`.
    pub fn connect(cfg: &PipelineConfig) -> crate::gateway::Result<Self> {
        let gateway: Arc<dyn TransferGateway> = Arc::new(HttpGateway::new(cfg)?);
        let registry = Arc::new(StopwatchRegistry::new(cfg.tick_interval));
        Ok(Self::with_gateway(gateway, registry, cfg.download_dir.clone()))
    }

    pub fn with_gateway(
        gateway: Arc<dyn TransferGateway>,
        registry: Arc<StopwatchRegistry>,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            generate: GenerateOrchestrator::new(gateway.clone(), registry.clone()),
            convert: ConvertOrchestrator::new(gateway.clone(), registry.clone()),
            ingest: IngestOrchestrator::new(gateway.clone(), registry.clone()),
            report: ReportOrchestrator::new(gateway, registry.clone(), download_dir),
            registry,
        }
    }

    /// Dispose every stage and stop every stopwatch producer.
    pub fn shutdown(&self) {
        self.generate.dispose();
        self.convert.dispose();
        self.ingest.dispose();
        self.report.dispose();
        self.registry.shutdown();
        debug!(
            live_producers = self.registry.live_producers(),
            "pipeline session shut down"
        );
    }
}
