//! Optional relay hop in front of the loader.
//!
//! Before an upload is parsed it can be forwarded, unchanged, to a small
//! local HTTP service that acknowledges it. The service lives here too and
//! runs as its own task next to the main app; the two share nothing but the
//! HTTP call.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// What to do with the relay result before parsing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayPolicy {
    /// No relay hop.
    #[default]
    Disabled,
    /// Relay, report the outcome, parse regardless.
    Advisory,
    /// Parse only after the relay answered 200.
    Gating,
}

/// The relay service's answer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl RelayAck {
    pub fn describe(&self) -> String {
        if let Some(path) = &self.file_path {
            return format!("stored at {}", path);
        }
        match (&self.filename, &self.content_type) {
            (Some(name), Some(ct)) => format!("{} ({})", name, ct),
            (Some(name), None) => name.clone(),
            _ => "upload".to_string(),
        }
    }
}

/// Result of one relay attempt.
#[derive(Debug)]
pub enum RelayOutcome {
    Skipped,
    Acknowledged(RelayAck),
    Failed(RelayError),
}

/// How the relay service treats received files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayMode {
    /// Answer with `{filename, content_type}`.
    Echo,
    /// Write the file under `dir` and answer with `{file_path}`.
    Store { dir: std::path::PathBuf },
}

#[cfg(feature = "web")]
pub use service::{router, serve, serve_on, store_upload};

#[cfg(feature = "web")]
pub use client::RelayClient;

#[cfg(feature = "web")]
mod service {
    use axum::{
        Json, Router,
        extract::{DefaultBodyLimit, Multipart, State},
        http::StatusCode,
        routing::post,
    };
    use lazy_static::lazy_static;
    use regex::Regex;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;
    use tracing::{info, warn};

    use super::{RelayAck, RelayMode};

    lazy_static! {
        static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9._-]").unwrap();
    }

    type RelayRejection = (StatusCode, Json<serde_json::Value>);

    fn reject(status: StatusCode, detail: impl std::fmt::Display) -> RelayRejection {
        (status, Json(serde_json::json!({ "detail": detail.to_string() })))
    }

    /// The relay's single endpoint, `POST /upload`, with a CORS policy that
    /// allows any origin, method and header. Request bodies up to
    /// `body_limit` bytes are accepted.
    pub fn router(mode: RelayMode, body_limit: usize) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/upload", post(receive_upload))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(mode))
    }

    /// Bind `addr` and serve the relay until the process exits.
    pub async fn serve(addr: &str, mode: RelayMode, body_limit: usize) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        serve_on(listener, mode, body_limit).await
    }

    pub async fn serve_on(listener: TcpListener, mode: RelayMode, body_limit: usize) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, ?mode, body_limit, "relay service listening");
        axum::serve(listener, router(mode, body_limit)).await
    }

    async fn receive_upload(
        State(mode): State<Arc<RelayMode>>,
        mut multipart: Multipart,
    ) -> Result<Json<RelayAck>, RelayRejection> {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| reject(StatusCode::BAD_REQUEST, e))?
        {
            if field.name() != Some("file") {
                continue;
            }

            let filename = field.file_name().unwrap_or("upload").to_string();
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| reject(StatusCode::BAD_REQUEST, e))?;

            info!(file = %filename, size = bytes.len(), "relay received upload");

            let ack = match mode.as_ref() {
                RelayMode::Echo => RelayAck {
                    filename: Some(filename),
                    content_type,
                    file_path: None,
                },
                RelayMode::Store { dir } => {
                    let dir = dir.clone();
                    let path = tokio::task::spawn_blocking(move || store_upload(&dir, &filename, &bytes))
                        .await
                        .map_err(|e| reject(StatusCode::INTERNAL_SERVER_ERROR, e))?
                        .map_err(|e| {
                            warn!(error = %e, "relay could not store upload");
                            reject(StatusCode::INTERNAL_SERVER_ERROR, e)
                        })?;
                    RelayAck {
                        filename: None,
                        content_type: None,
                        file_path: Some(path.to_string_lossy().into_owned()),
                    }
                }
            };
            return Ok(Json(ack));
        }

        Err(reject(StatusCode::BAD_REQUEST, "missing multipart field 'file'"))
    }

    /// Write an upload under `dir` with a unique, server-chosen name that
    /// keeps a sanitized copy of the original name as its suffix.
    pub fn store_upload(dir: &Path, filename: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let base = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let safe = UNSAFE_FILENAME_CHARS.replace_all(&base, "_");

        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&format!("-{}", safe))
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        let (_, path) = file.keep()?;
        Ok(path)
    }
}

#[cfg(feature = "web")]
mod client {
    use reqwest::StatusCode;
    use reqwest::multipart::{Form, Part};
    use std::time::Duration;
    use tracing::{info, warn};

    use super::{RelayAck, RelayOutcome};
    use crate::error::RelayError;
    use crate::loader::UploadedFile;

    /// Forwards uploads to the relay service.
    #[derive(Clone, Debug)]
    pub struct RelayClient {
        http: reqwest::Client,
        url: String,
    }

    impl RelayClient {
        pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RelayError> {
            let http = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| RelayError::Request(e.to_string()))?;
            Ok(Self {
                http,
                url: url.into(),
            })
        }

        pub fn url(&self) -> &str {
            &self.url
        }

        /// Post `file` to the relay once. Never retries.
        pub async fn forward(&self, file: &UploadedFile) -> RelayOutcome {
            match self.try_forward(file).await {
                Ok(ack) => {
                    info!(file = %file.name, ack = %ack.describe(), "relay acknowledged upload");
                    RelayOutcome::Acknowledged(ack)
                }
                Err(error) => {
                    warn!(file = %file.name, %error, "relay failed");
                    RelayOutcome::Failed(error)
                }
            }
        }

        async fn try_forward(&self, file: &UploadedFile) -> Result<RelayAck, RelayError> {
            let part = Part::bytes(file.bytes.clone())
                .file_name(file.name.clone())
                .mime_str(&file.effective_content_type())
                .map_err(|e| RelayError::Request(e.to_string()))?;
            let form = Form::new().part("file", part);

            let response = self
                .http
                .post(&self.url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| RelayError::Unreachable(e.to_string()))?;

            let status = response.status();
            if status != StatusCode::OK {
                let body = response.text().await.unwrap_or_default();
                return Err(RelayError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            response
                .json::<RelayAck>()
                .await
                .map_err(|e| RelayError::InvalidResponse(e.to_string()))
        }
    }
}
