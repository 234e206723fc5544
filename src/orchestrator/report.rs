use super::{Stage, StageError, StageRunner, TriggerOutcome};
use crate::gateway::TransferGateway;
use crate::model::{ExportFormat, ExportedFile, StudentPage};
use crate::query::QuerySpec;
use crate::stopwatch::StopwatchRegistry;
use bytes::Bytes;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Stage 4: browse, filter and export stored students.
///
/// Loading and exporting are timed by separate stopwatches and may be in
/// flight at the same time.
pub struct ReportOrchestrator {
    gateway: Arc<dyn TransferGateway>,
    spec: Mutex<QuerySpec>,
    load: StageRunner<StudentPage>,
    export: StageRunner<ExportedFile>,
    download_dir: PathBuf,
}

impl ReportOrchestrator {
    pub fn new(
        gateway: Arc<dyn TransferGateway>,
        registry: Arc<StopwatchRegistry>,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            gateway,
            spec: Mutex::new(QuerySpec::default()),
            load: StageRunner::new(Stage::ReportLoad, registry.clone()),
            export: StageRunner::new(Stage::ReportExport, registry),
            download_dir,
        }
    }

    pub fn load_runner(&self) -> &StageRunner<StudentPage> {
        &self.load
    }

    pub fn export_runner(&self) -> &StageRunner<ExportedFile> {
        &self.export
    }

    fn spec_mut(&self) -> MutexGuard<'_, QuerySpec> {
        self.spec.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn query_spec(&self) -> QuerySpec {
        self.spec_mut().clone()
    }

    /// Fetch the page described by the current query spec.
    pub async fn load(&self) -> TriggerOutcome<StudentPage> {
        let spec = self.query_spec();
        self.load
            .run(|| async move { self.gateway.query(&spec).await.map_err(StageError::from) })
            .await
    }

    /// Replace the whole query at once and reload.
    pub async fn set_query(&self, spec: QuerySpec) -> TriggerOutcome<StudentPage> {
        *self.spec_mut() = spec;
        self.load().await
    }

    /// Download the full export and save it under the download directory.
    pub async fn export(&self, format: ExportFormat) -> TriggerOutcome<ExportedFile> {
        self.export
            .run(|| async move {
                let payload = self.gateway.export_data(format).await?;
                save_export(&self.download_dir, format, payload).await
            })
            .await
    }

    pub fn dispose(&self) {
        self.load.dispose();
        self.export.dispose();
    }
}

/// Step-by-step query edits for interactive front ends; the CLI sets the
/// whole query at once.
#[allow(dead_code)]
impl ReportOrchestrator {
    pub async fn change_page(
        &self,
        page_index: u32,
        page_size: NonZeroU32,
    ) -> TriggerOutcome<StudentPage> {
        self.spec_mut().change_page(page_index, page_size);
        self.load().await
    }

    /// Replace the filters, return to the first page and reload.
    pub async fn apply_filters(
        &self,
        id_filter: Option<&str>,
        class_filter: Option<&str>,
    ) -> TriggerOutcome<StudentPage> {
        self.spec_mut().apply_filters(id_filter, class_filter);
        self.load().await
    }

    pub async fn clear_filters(&self) -> TriggerOutcome<StudentPage> {
        self.spec_mut().clear_filters();
        self.load().await
    }
}

async fn save_export(
    dir: &Path,
    format: ExportFormat,
    payload: Bytes,
) -> Result<ExportedFile, StageError> {
    let path = dir.join(format.file_name());
    let save_err = |source| StageError::Save {
        path: path.clone(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(save_err)?;
    tokio::fs::write(&path, &payload).await.map_err(save_err)?;
    info!(path = %path.display(), bytes = payload.len(), "export saved");

    Ok(ExportedFile {
        format,
        path,
        bytes_written: payload.len() as u64,
    })
}
