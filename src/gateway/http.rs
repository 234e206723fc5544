use super::{GatewayError, Result, TransferGateway};
use crate::config::PipelineConfig;
use crate::model::{ExportFormat, FilePayload, GeneratedFile, IngestSummary, StudentPage};
use crate::query::{self, QuerySpec};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use tracing::debug;

/// Upper bound on the export buffer reserved from `Content-Length`.
const EXPORT_PREALLOC_LIMIT: usize = 8 * 1024 * 1024;

/// Initial export buffer size; the declared length is only a hint.
fn export_capacity(content_length: Option<u64>) -> usize {
    content_length
        .map_or(0, |len| usize::try_from(len).unwrap_or(usize::MAX))
        .min(EXPORT_PREALLOC_LIMIT)
}

/// reqwest-backed gateway for the pipeline REST service.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    /// Base URL including the API prefix (e.g. "http://localhost:8080/api")
    base_url: String,
    http: Client,
}

impl HttpGateway {
    pub fn new(cfg: &PipelineConfig) -> Result<Self> {
        let http = Client::builder().user_agent(&cfg.user_agent).build()?;
        Ok(Self::with_client(&cfg.base_url, http))
    }

    /// Use a preconfigured reqwest client (proxies, TLS roots...).
    pub fn with_client(base_url: impl Into<String>, http: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| GatewayError::InvalidRequest(format!("bad URL {raw}: {e}")))
    }

    fn file_form(file: FilePayload) -> Result<Form> {
        if file.is_empty() {
            return Err(GatewayError::InvalidRequest(format!(
                "file {} is empty",
                file.name
            )));
        }
        let part = Part::bytes(Vec::from(file.bytes)).file_name(file.name);
        Ok(Form::new().part("file", part))
    }

    /// Turn a non-success status into `GatewayError::Api`.
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::from_body(status.as_u16(), &body))
    }

    async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
        Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Parse(format!("Failed to parse JSON response: {e}")))
    }
}

#[async_trait]
impl TransferGateway for HttpGateway {
    async fn generate(&self, count: NonZeroU32) -> Result<GeneratedFile> {
        let mut url = self.endpoint("generate")?;
        url.query_pairs_mut().append_pair("count", &count.to_string());
        debug!(%url, "generate");

        let response = self.http.post(url).send().await?;
        Self::handle_response(response).await
    }

    async fn convert(&self, file: FilePayload) -> Result<GeneratedFile> {
        let url = self.endpoint("process")?;
        debug!(%url, file = %file.name, bytes = file.len(), "convert");

        let form = Self::file_form(file)?;
        let response = self.http.post(url).multipart(form).send().await?;
        Self::handle_response(response).await
    }

    async fn ingest(&self, file: FilePayload) -> Result<IngestSummary> {
        let url = self.endpoint("upload")?;
        debug!(%url, file = %file.name, bytes = file.len(), "ingest");

        let form = Self::file_form(file)?;
        let response = self.http.post(url).multipart(form).send().await?;
        Self::handle_response(response).await
    }

    async fn query(&self, spec: &QuerySpec) -> Result<StudentPage> {
        let mut url = self.endpoint("students")?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query::build(spec) {
                pairs.append_pair(key, &value);
            }
        }
        debug!(%url, "query");

        let response = self.http.get(url).send().await?;
        Self::handle_response(response).await
    }

    async fn export_data(&self, format: ExportFormat) -> Result<Bytes> {
        let url = self.endpoint(&format!("students/export/{}", format.as_path_segment()))?;
        debug!(%url, "export");

        let response = Self::check_status(self.http.get(url).send().await?).await?;
        let mut body = BytesMut::with_capacity(export_capacity(response.content_length()));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        debug!(bytes = body.len(), "export downloaded");
        Ok(body.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Multipart, Path, Query, RawQuery};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    async fn serve(router: Router) -> HttpGateway {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        HttpGateway::with_client(format!("http://{addr}/api/"), Client::new())
    }

    async fn read_file_field(mut multipart: Multipart) -> (String, String, Vec<u8>) {
        let field = multipart.next_field().await.unwrap().unwrap();
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap().to_vec();
        (name, file_name, bytes)
    }

    fn count(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn export_buffer_ignores_oversized_content_length() {
        assert_eq!(export_capacity(None), 0);
        assert_eq!(export_capacity(Some(512)), 512);
        assert_eq!(export_capacity(Some(u64::MAX)), EXPORT_PREALLOC_LIMIT);
    }

    #[test]
    fn base_url_is_trimmed() {
        let gw = HttpGateway::with_client("http://localhost:8080/api/", Client::new());
        assert_eq!(gw.base_url, "http://localhost:8080/api");
        assert_eq!(
            gw.endpoint("students/export/csv").unwrap().as_str(),
            "http://localhost:8080/api/students/export/csv"
        );
    }

    #[tokio::test]
    async fn generate_posts_count_and_reads_file_path() {
        let router = Router::new().route(
            "/api/generate",
            post(|Query(q): Query<HashMap<String, String>>| async move {
                Json(json!({ "filePath": format!("out/students-{}.xlsx", q["count"]) }))
            }),
        );
        let gw = serve(router).await;

        let file = gw.generate(count(1000)).await.unwrap();
        assert_eq!(file.file_path, "out/students-1000.xlsx");
    }

    #[tokio::test]
    async fn convert_and_ingest_send_multipart_file_field() {
        let router = Router::new()
            .route(
                "/api/process",
                post(|multipart: Multipart| async move {
                    let (field, file_name, bytes) = read_file_field(multipart).await;
                    assert_eq!(field, "file");
                    Json(json!({ "filePath": format!("out/{}-{}.csv", file_name, bytes.len()) }))
                }),
            )
            .route(
                "/api/upload",
                post(|multipart: Multipart| async move {
                    let (field, _, bytes) = read_file_field(multipart).await;
                    assert_eq!(field, "file");
                    let rows = bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count();
                    Json(json!({ "inserted": rows - 1 }))
                }),
            );
        let gw = serve(router).await;

        let converted = gw
            .convert(FilePayload::new("students.xlsx", &b"PK\x03\x04fake"[..]))
            .await
            .unwrap();
        assert_eq!(converted.file_path, "out/students.xlsx-8.csv");

        let csv = "studentId,firstName\n1,Ada\n2,Grace\n3,Edsger\n";
        let summary = gw
            .ingest(FilePayload::new("students.csv", csv.as_bytes().to_vec()))
            .await
            .unwrap();
        assert_eq!(summary.inserted_count, 3);
    }

    #[tokio::test]
    async fn empty_file_is_rejected_before_sending() {
        let gw = HttpGateway::with_client("http://127.0.0.1:9/api", Client::new());
        let err = gw
            .ingest(FilePayload::new("empty.csv", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn query_sends_only_non_blank_filters() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let seen2 = seen.clone();
        let router = Router::new().route(
            "/api/students",
            get(move |RawQuery(q): RawQuery| {
                let seen = seen2.clone();
                async move {
                    seen.lock().unwrap().push(q.unwrap_or_default());
                    Json(json!({
                        "content": [{
                            "studentId": 5, "firstName": "Ada", "lastName": "Lovelace",
                            "dob": "2003-02-01", "studentClass": "Class1", "score": 91
                        }],
                        "totalElements": 31, "totalPages": 4, "size": 10, "number": 2
                    }))
                }
            }),
        );
        let gw = serve(router).await;

        let spec = QuerySpec::new(2, NonZeroU32::new(10).unwrap(), Some("S123"), Some("  "));
        let page = gw.query(&spec).await.unwrap();
        assert_eq!(page.total_count, 31);
        assert_eq!(page.records[0].first_name, "Ada");
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["page=2&size=10&studentId=S123".to_string()]
        );
    }

    #[tokio::test]
    async fn export_returns_raw_payload() {
        let router = Router::new().route(
            "/api/students/export/{format}",
            get(|Path(format): Path<String>| async move {
                format!("exported as {format}").into_bytes()
            }),
        );
        let gw = serve(router).await;

        let body = gw.export_data(ExportFormat::Pdf).await.unwrap();
        assert_eq!(&body[..], b"exported as pdf");
    }

    #[tokio::test]
    async fn non_success_status_carries_remote_message() {
        let router = Router::new()
            .route(
                "/api/generate",
                post(|| async {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "status": 400, "message": "Count too large" })),
                    )
                }),
            )
            .route(
                "/api/students/export/{format}",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            );
        let gw = serve(router).await;

        let err = gw.generate(count(5)).await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.remote_message(), Some("Count too large"));

        let err = gw.export_data(ExportFormat::Csv).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.remote_message(), None);
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let router = Router::new().route("/api/upload", post(|| async { "not json" }));
        let gw = serve(router).await;

        let err = gw
            .ingest(FilePayload::new("s.csv", &b"a\n"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Parse(_)));
    }
}
