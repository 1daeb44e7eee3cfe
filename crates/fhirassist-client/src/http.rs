use crate::api::{ChatApi, ChatRequest, ChatResponse, SummarizeRequest};
use crate::config::ClientConfig;
use crate::sse::ByteStream;
use async_trait::async_trait;
use fhirassist_core::{FhirAssistError, FhirAssistResult};
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Assistant backend reached over the admin API.
pub struct HttpChatApi {
    config: ClientConfig,
    http: reqwest::Client,
    available: Mutex<Option<bool>>,
}

impl HttpChatApi {
    /// Client for `config`. Fails if the config does not validate.
    pub fn new(config: ClientConfig) -> FhirAssistResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.stream_idle_timeout())
            .build()
            .map_err(|e| FhirAssistError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            available: Mutex::new(None),
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> FhirAssistResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.config.url(path);
        let resp = self
            .authorize(self.http.post(&url))
            .timeout(self.config.request_timeout())
            .json(body)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            error!(url = %url, status = %status, "Assistant API request failed");
            return Err(FhirAssistError::Http(format!(
                "Assistant API error {status}: {error_body}"
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| FhirAssistError::Http(format!("Invalid response body: {e}")))
    }

    async fn probe(&self) -> bool {
        let url = self.config.url(&self.config.endpoints.health);
        let result = self
            .authorize(self.http.head(&url))
            .timeout(self.config.availability_timeout())
            .send()
            .await;

        match result {
            // 503 means the route exists but the assistant upstream is down.
            Ok(resp) => resp.status().is_success() || resp.status() == StatusCode::SERVICE_UNAVAILABLE,
            Err(e) => {
                debug!(url = %url, error = %e, "Availability probe failed");
                false
            }
        }
    }
}

fn map_request_error(e: reqwest::Error) -> FhirAssistError {
    if e.is_timeout() {
        FhirAssistError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        FhirAssistError::Network(e.to_string())
    } else {
        FhirAssistError::Http(e.to_string())
    }
}

fn map_body_error(e: reqwest::Error) -> FhirAssistError {
    if e.is_timeout() {
        FhirAssistError::Timeout(e.to_string())
    } else {
        FhirAssistError::Stream(format!("network read failed: {e}"))
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn is_available(&self) -> bool {
        if let Some(known) = *self.available.lock() {
            return known;
        }
        let available = self.probe().await;
        *self.available.lock() = Some(available);
        info!(available, "Assistant availability checked");
        available
    }

    async fn retry_connection(&self) -> bool {
        *self.available.lock() = None;
        self.is_available().await
    }

    async fn open_stream(&self, request: &ChatRequest) -> FhirAssistResult<ByteStream> {
        let url = self.config.url(&self.config.endpoints.stream);
        debug!(url = %url, message_len = request.message.len(), "Opening chat stream");

        let idle = self.config.stream_idle_timeout();
        let send = self
            .authorize(self.http.post(&url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send();
        // The idle limit also covers the wait for the response headers.
        let resp = match tokio::time::timeout(idle, send).await {
            Ok(result) => result.map_err(map_request_error)?,
            Err(_) => {
                warn!(url = %url, idle_secs = idle.as_secs(), "Chat stream did not open in time");
                return Err(FhirAssistError::Timeout(format!(
                    "no response within {}s",
                    idle.as_secs()
                )));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(FhirAssistError::Http(format!(
                "HTTP {status}: {error_body}"
            )));
        }

        let body = Box::pin(resp.bytes_stream());
        let stream = futures_util::stream::unfold(Some(body), move |state| async move {
            let mut body = state?;
            match tokio::time::timeout(idle, body.next()).await {
                Ok(Some(Ok(bytes))) => Some((Ok(bytes.to_vec()), Some(body))),
                Ok(Some(Err(e))) => Some((Err(map_body_error(e)), None)),
                Ok(None) => None,
                Err(_) => {
                    warn!(idle_secs = idle.as_secs(), "Chat stream went idle");
                    Some((
                        Err(FhirAssistError::Timeout(format!(
                            "no data received for {}s",
                            idle.as_secs()
                        ))),
                        None,
                    ))
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn chat(&self, request: &ChatRequest) -> FhirAssistResult<ChatResponse> {
        self.post_json(&self.config.endpoints.chat, request).await
    }

    async fn summarize(&self, request: &SummarizeRequest) -> FhirAssistResult<ChatResponse> {
        self.post_json(&self.config.endpoints.summarize, request).await
    }
}
