use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use wayback_core::{MirrorConfig, RetryPolicy};

use engine_logging::engine_warn;

use crate::rewriter::{ArchivedRequest, ArchivedResponse};
use crate::{FailureKind, MirrorError};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Redirect hops followed before giving up with `RedirectLoop`.
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub retry: RetryPolicy,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            redirect_limit: 5,
            max_bytes: 50 * 1024 * 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl FetchSettings {
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            request_timeout: config.fetch_timeout,
            redirect_limit: config.redirect_limit,
            max_bytes: config.max_bytes,
            retry: config.retry,
            ..Self::default()
        }
    }
}

/// The final answer for one capture, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub response: ArchivedResponse,
    pub redirect_count: usize,
    pub attempts: u32,
    /// Some attempt was answered with 429 or 503.
    pub rate_limited: bool,
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &ArchivedRequest) -> Result<FetchOutput, MirrorError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }

    fn build_client(&self, redirect_counter: Arc<AtomicUsize>) -> Result<reqwest::Client, String> {
        let redirect_limit = self.settings.redirect_limit;
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            let count = attempt.previous().len();
            redirect_counter.store(count, Ordering::Relaxed);
            if count > redirect_limit {
                attempt.error("redirect limit exceeded")
            } else {
                attempt.follow()
            }
        });

        reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .redirect(policy)
            .build()
            .map_err(|err| err.to_string())
    }

    async fn fetch_once(
        &self,
        request: &ArchivedRequest,
        redirect_counter: Arc<AtomicUsize>,
    ) -> Result<ArchivedResponse, (FailureKind, String)> {
        let url = reqwest::Url::parse(&request.archived_url)
            .map_err(|err| (FailureKind::InvalidUrl, err.to_string()))?;
        let client = self
            .build_client(redirect_counter)
            .map_err(|message| (FailureKind::Network, message))?;

        let response = client.get(url).send().await.map_err(map_reqwest_error)?;

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err((
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large".to_string(),
                ));
            }
        }

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = body.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err((
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large".to_string(),
                ));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(ArchivedResponse {
            request: request.clone(),
            final_url,
            status,
            content_type,
            body,
        })
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &ArchivedRequest) -> Result<FetchOutput, MirrorError> {
        let max_attempts = self.settings.retry.max_attempts.max(1);
        let mut rate_limited = false;
        let mut attempt = 1;
        loop {
            let redirect_counter = Arc::new(AtomicUsize::new(0));
            let response = self
                .fetch_once(request, redirect_counter.clone())
                .await
                .map_err(|(kind, message)| MirrorError::new(kind, &request.archived_url, message))?;

            rate_limited |= is_rate_limit(response.status);
            let retryable = response.status >= 500 || response.status == 429;
            if retryable && attempt < max_attempts {
                let delay = self.settings.retry.delay_before(attempt);
                engine_warn!(
                    "{} answered {} (attempt {attempt}/{max_attempts}); retrying in {delay:?}",
                    request.archived_url,
                    response.status
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Ok(FetchOutput {
                response,
                redirect_count: redirect_counter.load(Ordering::Relaxed),
                attempts: attempt,
                rate_limited,
            });
        }
    }
}

pub(crate) fn is_rate_limit(status: u16) -> bool {
    status == 429 || status == 503
}

fn map_reqwest_error(err: reqwest::Error) -> (FailureKind, String) {
    if err.is_timeout() {
        return (FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return (FailureKind::RedirectLoop, err.to_string());
    }
    (FailureKind::Network, err.to_string())
}
