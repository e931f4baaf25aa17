use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use testprep_core::model::{CompletionSummary, SessionId, SubmissionPayload};

use crate::error::HttpSinkConfigError;
use crate::sink::{SubmissionSink, TransportError};

const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Debug)]
pub struct HttpSinkConfig {
    pub base_url: Url,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

impl HttpSinkConfig {
    /// Build a config with the default timeout and no credential.
    ///
    /// # Errors
    ///
    /// Returns `HttpSinkConfigError::InvalidBaseUrl` if `base_url` does not parse.
    pub fn new(base_url: &str) -> Result<Self, HttpSinkConfigError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            api_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Read `TESTPREP_API_BASE_URL`, `TESTPREP_API_TOKEN` and `TESTPREP_API_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns `HttpSinkConfigError` if the base url is missing or any value is malformed.
    pub fn from_env() -> Result<Self, HttpSinkConfigError> {
        let raw_url = env::var("TESTPREP_API_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(HttpSinkConfigError::Missing("TESTPREP_API_BASE_URL"))?;
        let mut config = Self::new(&raw_url)?;

        config.api_token = env::var("TESTPREP_API_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());

        if let Ok(raw) = env::var("TESTPREP_API_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| HttpSinkConfigError::InvalidTimeout { raw: raw.clone() })?;
            config.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `{base}/sessions/{id}/submit`
    ///
    /// # Errors
    ///
    /// Returns `url::ParseError` if the joined path is not a valid url.
    pub fn submit_url(&self, session_id: SessionId) -> Result<Url, url::ParseError> {
        self.base_url.join(&format!("sessions/{session_id}/submit"))
    }
}

/// `Url::join` replaces the last segment unless the base ends with a slash.
fn parse_base_url(raw: &str) -> Result<Url, HttpSinkConfigError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).map_err(|source| HttpSinkConfigError::InvalidBaseUrl {
        raw: raw.to_string(),
        source,
    })
}

/// Submits sessions to the REST API in a single POST.
#[derive(Clone)]
pub struct HttpSubmissionSink {
    client: Client,
    config: HttpSinkConfig,
}

impl HttpSubmissionSink {
    /// # Errors
    ///
    /// Returns `HttpSinkConfigError::Client` if the HTTP client cannot be built.
    pub fn new(config: HttpSinkConfig) -> Result<Self, HttpSinkConfigError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// # Errors
    ///
    /// See [`HttpSinkConfig::from_env`] and [`HttpSubmissionSink::new`].
    pub fn from_env() -> Result<Self, HttpSinkConfigError> {
        Self::new(HttpSinkConfig::from_env()?)
    }

    #[must_use]
    pub fn config(&self) -> &HttpSinkConfig {
        &self.config
    }
}

#[async_trait]
impl SubmissionSink for HttpSubmissionSink {
    async fn submit_all(
        &self,
        payload: &SubmissionPayload,
    ) -> Result<CompletionSummary, TransportError> {
        let url = self
            .config
            .submit_url(payload.session_id)
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let mut request = self
            .client
            .post(url)
            .header("Idempotency-Key", payload.submission_id.to_string())
            .json(payload);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::Decode(e.to_string()))?;
            return Err(TransportError::Rejected(body));
        }
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        response
            .json::<CompletionSummary>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}
