//! HTTP vision client.
//!
//! Talks to a label / face-compare service with two JSON endpoints:
//!
//! | Endpoint | Request | Response |
//! |---|---|---|
//! | `POST {endpoint}/v1/labels` | `{"image": b64}` | `{"labels": [{"name", "confidence"}]}` |
//! | `POST {endpoint}/v1/compare` | `{"source": b64, "target": b64, "similarity_threshold": pct}` | `{"face_matches": [...]}` |
//!
//! A non-empty `face_matches` array means the faces matched.

use std::sync::OnceLock;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use latchkey_types::LatchError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::labels::{Label, presence_confidence};
use crate::service::VisionService;

#[derive(Serialize)]
struct LabelsRequest {
    image: String,
}

#[derive(Deserialize)]
struct LabelsResponse {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Serialize)]
struct CompareRequest {
    source: String,
    target: String,
    similarity_threshold: f32,
}

#[derive(Deserialize)]
struct CompareResponse {
    #[serde(default)]
    face_matches: Vec<Value>,
}

/// [`VisionService`] backed by a remote HTTP API.
///
/// The underlying blocking client is built on first use, on the calling
/// thread, so the service can be constructed from async code.
pub struct HttpVisionService {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    client: OnceLock<Client>,
}

impl HttpVisionService {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
            client: OnceLock::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn client(&self) -> Result<&Client, LatchError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let built = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| LatchError::Vision(format!("failed to build HTTP client: {e}")))?;
        Ok(self.client.get_or_init(|| built))
    }

    fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, LatchError> {
        let url = format!("{}{}", self.endpoint, path);
        let mut request = self.client()?.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .map_err(|e| LatchError::Vision(format!("{url} unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(LatchError::Vision(format!(
                "{url} returned HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .map_err(|e| LatchError::Vision(format!("failed to parse {url} response: {e}")))
    }
}

impl std::fmt::Debug for HttpVisionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpVisionService")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VisionService for HttpVisionService {
    fn detect_face_presence(&self, image: &[u8]) -> Result<f32, LatchError> {
        let response: LabelsResponse = self.post(
            "/v1/labels",
            &LabelsRequest {
                image: STANDARD.encode(image),
            },
        )?;
        let confidence = presence_confidence(&response.labels);
        debug!(labels = response.labels.len(), confidence, "labels scored");
        Ok(confidence)
    }

    fn compare_faces(
        &self,
        source: &[u8],
        reference: &[u8],
        similarity_threshold: f32,
    ) -> Result<bool, LatchError> {
        let response: CompareResponse = self.post(
            "/v1/compare",
            &CompareRequest {
                source: STANDARD.encode(source),
                target: STANDARD.encode(reference),
                similarity_threshold,
            },
        )?;
        Ok(!response.face_matches.is_empty())
    }
}
