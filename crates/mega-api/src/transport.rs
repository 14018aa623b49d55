//! Sequenced JSON transport.
//!
//! One logical call = one sequence number, drawn atomically at dispatch
//! and reused across retries. Retryable outcomes (connect errors, 5xx,
//! `Again`, `RateLimit` and friends) back off exponentially from 100 ms.
//! A 402 response carrying an `X-Hashcash` challenge is solved and the
//! call resubmitted with the solution header without consuming an attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use mega_core::{ClientConfig, Error, Result};

use crate::hashcash::{self, Challenge};
use crate::messages::EventBatch;

const HASHCASH_HEADER: &str = "X-Hashcash";
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

pub struct Transport {
    http: reqwest::Client,
    /// Separate client without a request timeout, for the event wait URL.
    poll_http: reqwest::Client,
    base: String,
    sn: AtomicU64,
    sid: RwLock<Option<String>>,
    retries: u32,
    hashcash_timeout: Duration,
    hashcash_workers: usize,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        let poll_http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            poll_http,
            base: config.api_url.trim_end_matches('/').to_string(),
            // sequence numbers start at a random 32-bit value per session
            sn: AtomicU64::new(rand::random::<u32>() as u64),
            sid: RwLock::new(None),
            retries: config.retries.max(1),
            hashcash_timeout: Duration::from_secs(config.hashcash_timeout_secs),
            hashcash_workers: config.hashcash_workers,
        })
    }

    pub fn set_session_id(&self, sid: Option<String>) {
        *self.sid.write().expect("sid lock poisoned") = sid;
    }

    pub fn session_id(&self) -> Option<String> {
        self.sid.read().expect("sid lock poisoned").clone()
    }

    /// Issue a command and decode the single-element response array.
    pub async fn request<Q, R>(&self, msg: &Q) -> Result<R>
    where
        Q: Serialize,
        R: DeserializeOwned,
    {
        let bytes = self.exec(serde_json::to_vec(&[msg])?).await?;
        decode_response(&bytes)
    }

    /// Issue a command whose success response is a bare status code.
    pub async fn request_status<Q: Serialize>(&self, msg: &Q) -> Result<()> {
        self.exec(serde_json::to_vec(&[msg])?).await.map(|_| ())
    }

    /// One logical call: draws the sequence number, retries, solves
    /// hashcash challenges, maps service codes.
    async fn exec(&self, body: Vec<u8>) -> Result<Vec<u8>> {
        let sn = self.sn.fetch_add(1, Ordering::SeqCst);
        let mut url = format!("{}/cs?id={}", self.base, sn);
        if let Some(sid) = self.session_id() {
            url.push_str("&sid=");
            url.push_str(&sid);
        }

        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0u32;
        let mut hashcash_response: Option<String> = None;
        loop {
            let mut req = self.http.post(&url).body(body.clone());
            req = req.header(reqwest::header::CONTENT_TYPE, "application/json");
            if let Some(h) = &hashcash_response {
                req = req.header(HASHCASH_HEADER, h);
            }

            let failure = match req.send().await {
                Err(e) => Error::Http(e.to_string()),
                Ok(resp) if resp.status() == StatusCode::PAYMENT_REQUIRED => {
                    let challenge = resp
                        .headers()
                        .get(HASHCASH_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(Challenge::parse);
                    match challenge {
                        Some(c) => {
                            debug!(sn, easiness = c.easiness, "solving transport challenge");
                            match hashcash::solve(
                                &c.token,
                                c.easiness,
                                self.hashcash_timeout,
                                self.hashcash_workers,
                            )
                            .await
                            {
                                Ok(prefix) => {
                                    hashcash_response = Some(c.response(&prefix));
                                    // resubmission does not count as an attempt
                                    continue;
                                }
                                // an unsolved challenge is retryable like any
                                // other transient transport failure
                                Err(e) => e,
                            }
                        }
                        None => Error::BadResponse("402 without a challenge".into()),
                    }
                }
                Ok(resp) if resp.status().is_server_error() => {
                    Error::Http(format!("http status {}", resp.status()))
                }
                Ok(resp) if !resp.status().is_success() => {
                    return Err(Error::Http(format!("http status {}", resp.status())));
                }
                Ok(resp) => {
                    let bytes = resp
                        .bytes()
                        .await
                        .map_err(|e| Error::Http(e.to_string()))?;
                    match service_error_code(&bytes) {
                        Some(code) => match Error::from_service_code(code) {
                            Ok(()) => return Ok(bytes.to_vec()),
                            Err(e) => e,
                        },
                        None => return Ok(bytes.to_vec()),
                    }
                }
            };

            attempt += 1;
            let transport_level = matches!(failure, Error::Http(_) | Error::HashcashTimeout);
            if !failure.is_retryable() && !transport_level {
                return Err(failure);
            }
            if attempt >= self.retries {
                return Err(failure);
            }
            warn!(sn, attempt, error = %failure, "transport retry");
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    /// One `/sc` poll; returns the batch (possibly just a wait URL).
    pub async fn poll_events(&self, server_sn: &str) -> Result<EventBatch> {
        let mut url = format!("{}/sc?sn={}", self.base, server_sn);
        if let Some(sid) = self.session_id() {
            url.push_str("&sid=");
            url.push_str(&sid);
        }
        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let bytes = resp.bytes().await.map_err(|e| Error::Http(e.to_string()))?;
        if let Some(code) = service_error_code(&bytes) {
            Error::from_service_code(code)?;
        }
        Ok(serde_json::from_slice(&bytes)
            .map_err(|_| Error::BadResponse(preview(&bytes)))?)
    }

    /// Block on the server's wait URL until it signals new events.
    pub async fn wait_for_events(&self, wait_url: &str) -> Result<()> {
        self.poll_http
            .get(wait_url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(())
    }
}

/// Decode a response body that may be `[R]` or a bare `R`.
fn decode_response<R: DeserializeOwned>(bytes: &[u8]) -> Result<R> {
    if let Ok(mut items) = serde_json::from_slice::<Vec<R>>(bytes) {
        if !items.is_empty() {
            return Ok(items.remove(0));
        }
    }
    serde_json::from_slice::<R>(bytes).map_err(|_| Error::BadResponse(preview(bytes)))
}

/// Extract a service status code from a body shaped `<int>` or `[<int>]`.
fn service_error_code(bytes: &[u8]) -> Option<i32> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    match value {
        serde_json::Value::Number(n) => n.as_i64().map(|v| v as i32),
        serde_json::Value::Array(items) if items.len() == 1 => {
            items[0].as_i64().map(|v| v as i32)
        }
        _ => None,
    }
}

fn preview(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    s.chars().take(128).collect()
}
