//! S3-compatible flat-file store.
//!
//! Signs HEAD/GET requests with SigV4 and maps responses onto the
//! RemoteStore contract: 404 is "no file for this day", 401/403 is an
//! authentication failure that trips the circuit breaker, 429 and 5xx are
//! retried with exponential backoff plus jitter. Every request carries the
//! client timeout, so a stalled transfer surfaces as `RemoteError::Timeout`.

use super::circuit_breaker::CircuitBreaker;
use super::remote::{RemoteError, RemoteHead, RemoteObject, RemoteStore};
use super::sigv4::SigV4Signer;
use crate::asset::AssetClass;
use crate::config::{RemoteConfig, RetryConfig};
use chrono::{NaiveDate, Utc};
use rand::Rng;
use reqwest::blocking::{Client, Response};
use reqwest::{Method, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct S3FlatFiles {
    client: Client,
    endpoint: Url,
    bucket: String,
    signer: SigV4Signer,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
}

impl S3FlatFiles {
    pub fn new(
        config: &RemoteConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, RemoteError> {
        let access_key_id = config.access_key_id.clone().ok_or_else(|| {
            RemoteError::Authentication("MASSIVE_AWS_ACCESS_KEY_ID is not set".into())
        })?;
        let secret_access_key = config
            .secret_access_key
            .clone()
            .ok_or_else(|| RemoteError::Authentication("MASSIVE_API_KEY is not set".into()))?;

        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| RemoteError::InvalidEndpoint(format!("{}: {e}", config.endpoint)))?;
        if endpoint.host_str().is_none() {
            return Err(RemoteError::InvalidEndpoint(format!(
                "{}: no host",
                config.endpoint
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RemoteError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            bucket: config.bucket.clone(),
            signer: SigV4Signer::new(access_key_id, secret_access_key, config.region.clone()),
            circuit_breaker,
            retry: config.retry,
        })
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Send one signed request. Non-success statuses other than 404 become errors.
    fn send(&self, method: Method, key: &str) -> Result<Option<Response>, RemoteError> {
        let path = format!("/{}/{}", self.bucket, key);
        let url = self
            .endpoint
            .join(&path)
            .map_err(|e| RemoteError::InvalidEndpoint(format!("{path}: {e}")))?;

        let mut request = self.client.request(method.clone(), url);
        for (name, value) in self
            .signer
            .sign(method.as_str(), &self.host(), &path, &[], Utc::now())
        {
            request = request.header(name, value);
        }

        let resp = request.send().map_err(map_transport_error)?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Authentication(format!(
                "HTTP {status} for {key}"
            )));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(RemoteError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(RemoteError::Http {
                status: status.as_u16(),
                key: key.to_string(),
            });
        }

        Ok(Some(resp))
    }

    fn backoff(&self, attempt: u32, last_error: Option<&RemoteError>) -> Duration {
        let mut delay = self.retry.delay_for(attempt);
        if let Some(RemoteError::RateLimited { retry_after_secs }) = last_error {
            delay = delay.max(Duration::from_secs(*retry_after_secs));
        }
        let max = Duration::from_millis(self.retry.max_delay_ms);
        let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
        (delay + Duration::from_millis(jitter_ms)).min(max)
    }

    /// Run `op` with retry and circuit breaker logic. The breaker sees one
    /// failure per request that exhausts its retries, not one per attempt.
    fn with_retry<T>(
        &self,
        key: &str,
        op: impl Fn() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(RemoteError::CircuitBreakerTripped);
        }

        let mut last_error = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt, last_error.as_ref());
                debug!(key, attempt, ?delay, "retrying remote request");
                std::thread::sleep(delay);

                if !self.circuit_breaker.is_allowed() {
                    return Err(RemoteError::CircuitBreakerTripped);
                }
            }

            match op() {
                Ok(value) => {
                    self.circuit_breaker.record_success();
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    warn!(key, attempt, error = %e, "transient remote error");
                    last_error = Some(e);
                }
                Err(e) => {
                    if matches!(e, RemoteError::Authentication(_)) {
                        self.circuit_breaker.trip();
                    }
                    return Err(e);
                }
            }
        }

        self.circuit_breaker.record_failure();
        Err(last_error.unwrap_or_else(|| RemoteError::Network("max retries exceeded".into())))
    }
}

fn map_transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout(e.to_string())
    } else {
        RemoteError::Network(e.to_string())
    }
}

/// ETag header without the surrounding quotes.
fn etag(resp: &Response) -> Result<String, RemoteError> {
    resp.headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RemoteError::InvalidResponse("missing ETag header".into()))
}

impl RemoteStore for S3FlatFiles {
    fn name(&self) -> &str {
        "s3_flat_files"
    }

    fn head(&self, class: AssetClass, date: NaiveDate) -> Result<Option<RemoteHead>, RemoteError> {
        let key = class.object_key(date);
        self.with_retry(&key, || {
            let Some(resp) = self.send(Method::HEAD, &key)? else {
                return Ok(None);
            };
            Ok(Some(RemoteHead {
                content_id: etag(&resp)?,
                size: resp.content_length(),
            }))
        })
    }

    fn get(
        &self,
        class: AssetClass,
        date: NaiveDate,
    ) -> Result<Option<RemoteObject>, RemoteError> {
        let key = class.object_key(date);
        self.with_retry(&key, || {
            let Some(resp) = self.send(Method::GET, &key)? else {
                return Ok(None);
            };
            let content_id = etag(&resp)?;
            let bytes = resp.bytes().map_err(map_transport_error)?;
            debug!(key = %key, bytes = bytes.len(), "downloaded object");
            Ok(Some(RemoteObject {
                bytes: bytes.to_vec(),
                content_id,
            }))
        })
    }
}
