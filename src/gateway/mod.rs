//! Transfer gateway: the only component that talks to the pipeline service.
//!
//! Every operation is exactly one round trip. There are no retries and no
//! timeout beyond the transport default.

mod error;
mod http;

pub use error::{GatewayError, Result};
pub use http::HttpGateway;

use crate::model::{ExportFormat, FilePayload, GeneratedFile, IngestSummary, StudentPage};
use crate::query::QuerySpec;
use async_trait::async_trait;
use bytes::Bytes;
use std::num::NonZeroU32;

#[async_trait]
pub trait TransferGateway: Send + Sync {
    /// Ask the service to generate `count` synthetic students into an Excel file.
    async fn generate(&self, count: NonZeroU32) -> Result<GeneratedFile>;

    /// Upload an Excel file and have it converted to normalized CSV.
    async fn convert(&self, file: FilePayload) -> Result<GeneratedFile>;

    /// Upload a normalized CSV file for insertion into the store.
    async fn ingest(&self, file: FilePayload) -> Result<IngestSummary>;

    /// Fetch one filtered page of stored students.
    async fn query(&self, spec: &QuerySpec) -> Result<StudentPage>;

    /// Download every stored student encoded as `format`.
    async fn export_data(&self, format: ExportFormat) -> Result<Bytes>;
}
