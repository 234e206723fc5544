use super::{Stage, StageError, StageRunner, TriggerOutcome};
use crate::gateway::TransferGateway;
use crate::model::{FilePayload, GeneratedFile, IngestSummary};
use crate::stopwatch::StopwatchRegistry;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};

pub const NO_EXCEL_FILE: &str = "Please select an Excel file first";
pub const NO_CSV_FILE: &str = "Please select a CSV file first";
pub const EMPTY_FILE: &str = "Selected file is empty";

/// The file picked for an upload stage. Stays selected across triggers.
#[derive(Default)]
struct FileSelection(Mutex<Option<FilePayload>>);

impl FileSelection {
    fn set(&self, file: Option<FilePayload>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = file;
    }

    fn get(&self) -> Option<FilePayload> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The selected file, or the validation message to show instead.
    fn validated(&self, missing: &'static str) -> Result<FilePayload, &'static str> {
        match self.get() {
            None => Err(missing),
            Some(file) if file.is_empty() => Err(EMPTY_FILE),
            Some(file) => Ok(file),
        }
    }
}

/// Stage 1: ask the service to synthesize a student dataset.
pub struct GenerateOrchestrator {
    gateway: Arc<dyn TransferGateway>,
    runner: StageRunner<GeneratedFile>,
}

impl GenerateOrchestrator {
    pub fn new(gateway: Arc<dyn TransferGateway>, registry: Arc<StopwatchRegistry>) -> Self {
        Self {
            gateway,
            runner: StageRunner::new(Stage::Generate, registry),
        }
    }

    pub fn runner(&self) -> &StageRunner<GeneratedFile> {
        &self.runner
    }

    pub async fn generate(&self, count: NonZeroU32) -> TriggerOutcome<GeneratedFile> {
        self.runner
            .run(|| async move { self.gateway.generate(count).await.map_err(StageError::from) })
            .await
    }

    pub fn dispose(&self) {
        self.runner.dispose();
    }
}

/// Stage 2: upload an Excel workbook and have it normalized to CSV.
pub struct ConvertOrchestrator {
    gateway: Arc<dyn TransferGateway>,
    runner: StageRunner<GeneratedFile>,
    selection: FileSelection,
}

impl ConvertOrchestrator {
    pub fn new(gateway: Arc<dyn TransferGateway>, registry: Arc<StopwatchRegistry>) -> Self {
        Self {
            gateway,
            runner: StageRunner::new(Stage::Convert, registry),
            selection: FileSelection::default(),
        }
    }

    pub fn runner(&self) -> &StageRunner<GeneratedFile> {
        &self.runner
    }

    pub fn select_file(&self, file: FilePayload) {
        self.selection.set(Some(file));
    }

    pub async fn convert(&self) -> TriggerOutcome<GeneratedFile> {
        let file = match self.selection.validated(NO_EXCEL_FILE) {
            Ok(file) => file,
            Err(message) => return self.runner.reject(message),
        };
        self.runner
            .run(|| async move { self.gateway.convert(file).await.map_err(StageError::from) })
            .await
    }

    pub fn dispose(&self) {
        self.runner.dispose();
    }
}

/// Selection management for interactive front ends.
#[allow(dead_code)]
impl ConvertOrchestrator {
    pub fn clear_selection(&self) {
        self.selection.set(None);
    }

    pub fn selected_file(&self) -> Option<FilePayload> {
        self.selection.get()
    }
}

/// Stage 3: upload a normalized CSV file into the store.
pub struct IngestOrchestrator {
    gateway: Arc<dyn TransferGateway>,
    runner: StageRunner<IngestSummary>,
    selection: FileSelection,
}

impl IngestOrchestrator {
    pub fn new(gateway: Arc<dyn TransferGateway>, registry: Arc<StopwatchRegistry>) -> Self {
        Self {
            gateway,
            runner: StageRunner::new(Stage::Ingest, registry),
            selection: FileSelection::default(),
        }
    }

    pub fn runner(&self) -> &StageRunner<IngestSummary> {
        &self.runner
    }

    pub fn select_file(&self, file: FilePayload) {
        self.selection.set(Some(file));
    }

    pub async fn ingest(&self) -> TriggerOutcome<IngestSummary> {
        let file = match self.selection.validated(NO_CSV_FILE) {
            Ok(file) => file,
            Err(message) => return self.runner.reject(message),
        };
        self.runner
            .run(|| async move { self.gateway.ingest(file).await.map_err(StageError::from) })
            .await
    }

    pub fn dispose(&self) {
        self.runner.dispose();
    }
}

/// Selection management for interactive front ends.
#[allow(dead_code)]
impl IngestOrchestrator {
    pub fn clear_selection(&self) {
        self.selection.set(None);
    }

    pub fn selected_file(&self) -> Option<FilePayload> {
        self.selection.get()
    }
}
