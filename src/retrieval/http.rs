use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, warn};

use super::{AttemptOutcome, ExecutionContext, RetrievalCapability, RetrievalHost, RetrievalRequest};
use crate::config::RollcallConfig;
use crate::error::RetrievalError;

/// Fetches one result document per key over HTTP.
///
/// `GET <base_url>` is the landing page a context navigates to (and back to on
/// recovery); `GET <base_url>/<key>` returns the document for one key, with
/// the key percent-encoded as a single path segment. Job parameters travel as
/// query string on both.
pub struct HttpCapability {
    base_url: String,
    timeout: Duration,
    extension: String,
}

impl HttpCapability {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            extension: "pdf".to_string(),
        }
    }

    pub fn from_config(config: &RollcallConfig) -> Self {
        Self::new(config.base_url.clone(), config.request_timeout()).with_extension(&config.artifact_extension)
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }
}

#[async_trait]
impl RetrievalCapability for HttpCapability {
    async fn launch(&self, request: &RetrievalRequest) -> Result<Box<dyn RetrievalHost>, RetrievalError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(self.timeout)
            .build()
            .map_err(|e| RetrievalError::Launch(e.to_string()))?;
        let base_url = parse_base_url(&self.base_url)?;

        debug!(job_id = %request.job_id, base_url = %self.base_url, "Launched HTTP retrieval host");
        Ok(Box::new(HttpHost {
            shared: Arc::new(Shared {
                client,
                base_url,
                params: request.params.clone(),
                staging_dir: request.staging_dir.clone(),
                extension: self.extension.clone(),
                connected: AtomicBool::new(true),
            }),
        }))
    }
}

fn parse_base_url(raw: &str) -> Result<Url, RetrievalError> {
    let url = Url::parse(raw.trim_end_matches('/'))
        .map_err(|e| RetrievalError::Launch(format!("invalid base url {raw:?}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(RetrievalError::Launch(format!("base url {raw:?} cannot carry a path")));
    }
    Ok(url)
}

struct Shared {
    client: Client,
    base_url: Url,
    params: BTreeMap<String, String>,
    staging_dir: PathBuf,
    extension: String,
    connected: AtomicBool,
}

impl Shared {
    fn note_transport_error(&self, err: &reqwest::Error) {
        if err.is_connect() {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Load the landing page; a context is usable only after this succeeds.
    async fn navigate(&self) -> Result<(), String> {
        let response = self
            .client
            .get(self.base_url.clone())
            .query(&self.params)
            .send()
            .await
            .map_err(|e| {
                self.note_transport_error(&e);
                e.to_string()
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("landing page returned {status}"));
        }
        Ok(())
    }

    fn key_url(&self, key: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(key);
        }
        url
    }

    fn artifact_path(&self, key: &str) -> PathBuf {
        let file_name = key.replace(['/', '\\'], "_");
        self.staging_dir.join(format!("{file_name}.{}", self.extension))
    }
}

struct HttpHost {
    shared: Arc<Shared>,
}

#[async_trait]
impl RetrievalHost for HttpHost {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn create_context(&self) -> Result<Box<dyn ExecutionContext>, RetrievalError> {
        if !self.is_connected() {
            return Err(RetrievalError::Disconnected);
        }
        self.shared
            .navigate()
            .await
            .map_err(RetrievalError::ContextUnavailable)?;
        Ok(Box::new(HttpSession {
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn shutdown(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
    }
}

struct HttpSession {
    shared: Arc<Shared>,
}

#[async_trait]
impl ExecutionContext for HttpSession {
    async fn attempt(&mut self, key: &str) -> AttemptOutcome {
        let url = self.shared.key_url(key);
        let response = match self.shared.client.get(url).query(&self.shared.params).send().await {
            Ok(response) => response,
            Err(e) => {
                self.shared.note_transport_error(&e);
                return AttemptOutcome::Transient(e.into());
            }
        };

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => AttemptOutcome::NotFound,
            status if status.is_success() => {
                let body = match response.bytes().await {
                    Ok(body) => body,
                    Err(e) => return AttemptOutcome::Transient(e.into()),
                };
                if body.is_empty() {
                    return AttemptOutcome::NotFound;
                }
                let path = self.shared.artifact_path(key);
                match tokio::fs::write(&path, &body).await {
                    Ok(()) => AttemptOutcome::Success,
                    Err(e) => {
                        warn!(key, path = %path.display(), error = %e, "Failed to store artifact");
                        AttemptOutcome::Transient(e.into())
                    }
                }
            }
            status => AttemptOutcome::Transient(RetrievalError::UnexpectedStatus(status.as_u16())),
        }
    }

    async fn recover(&mut self) -> Result<(), RetrievalError> {
        self.shared
            .navigate()
            .await
            .map_err(RetrievalError::RecoveryFailed)
    }

    async fn dispose(&mut self) {}
}
