//! Scriptable in-memory gateway for orchestrator tests.

use crate::gateway::{GatewayError, Result, TransferGateway};
use crate::model::{ExportFormat, FilePayload, GeneratedFile, IngestSummary, StudentPage};
use crate::query::QuerySpec;
use async_trait::async_trait;
use bytes::Bytes;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Default)]
pub(crate) struct MockGateway {
    calls: AtomicUsize,
    delay: Duration,
    failure: Option<(u16, Option<String>)>,
    /// When set, every call waits for a permit before answering.
    gate: Option<Arc<Semaphore>>,
    page: Option<StudentPage>,
    pub specs: Mutex<Vec<QuerySpec>>,
    pub uploads: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, status: u16, message: Option<&str>) -> Self {
        self.failure = Some((status, message.map(str::to_string)));
        self
    }

    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn with_page(mut self, page: StudentPage) -> Self {
        self.page = Some(page);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.failure {
            Some((status, message)) => Err(GatewayError::Api {
                status: *status,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TransferGateway for MockGateway {
    async fn generate(&self, _count: NonZeroU32) -> Result<GeneratedFile> {
        self.answer().await?;
        Ok(GeneratedFile {
            file_path: "out/students.xlsx".to_string(),
        })
    }

    async fn convert(&self, file: FilePayload) -> Result<GeneratedFile> {
        self.uploads.lock().unwrap().push(file.name.clone());
        self.answer().await?;
        Ok(GeneratedFile {
            file_path: format!("out/{}.csv", file.name.trim_end_matches(".xlsx")),
        })
    }

    async fn ingest(&self, file: FilePayload) -> Result<IngestSummary> {
        self.uploads.lock().unwrap().push(file.name.clone());
        self.answer().await?;
        let rows = file.bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count();
        Ok(IngestSummary {
            inserted_count: rows.saturating_sub(1) as u64,
        })
    }

    async fn query(&self, spec: &QuerySpec) -> Result<StudentPage> {
        self.specs.lock().unwrap().push(spec.clone());
        self.answer().await?;
        Ok(self.page.clone().unwrap_or(StudentPage {
            records: Vec::new(),
            total_count: 0,
            total_pages: 0,
            size: spec.page_size.get(),
            number: spec.page_index,
        }))
    }

    async fn export_data(&self, format: ExportFormat) -> Result<Bytes> {
        self.answer().await?;
        Ok(Bytes::from(format!("{} export", format.as_path_segment())))
    }
}
