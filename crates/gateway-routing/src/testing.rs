//! Test doubles for the dispatcher.

use crate::account::{Account, AccountHandle, AccountStatus};
use crate::pool::{AccountPool, Selection};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use gateway_core::{
    GatewayError, GatewayResult, RequestRecord, RequestRecorder, UpstreamCall, UpstreamResponse,
    UpstreamTransport,
};
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;

/// One scripted upstream reply
pub enum Reply {
    /// Non-2xx status with a body
    Status(u16, String),
    /// Non-2xx status with a `Retry-After` header (seconds)
    StatusRetryAfter(u16, u64, String),
    /// 2xx SSE body from lines; `Err` items become transport errors
    Stream(Vec<Result<String, GatewayError>>),
    /// Network failure before any response
    Network(GatewayError),
}

impl Reply {
    pub fn capacity() -> Self {
        Self::Status(
            503,
            r#"{"error":{"code":503,"message":"No capacity available for model","status":"UNAVAILABLE","details":[{"@type":"type.googleapis.com/google.rpc.ErrorInfo","reason":"MODEL_CAPACITY_EXHAUSTED"}]}}"#
                .to_string(),
        )
    }

    pub fn text(parts: &[&str]) -> Self {
        let mut lines: Vec<Result<String, GatewayError>> = parts
            .iter()
            .map(|t| {
                Ok(format!(
                    "data: {{\"response\":{{\"candidates\":[{{\"content\":{{\"parts\":[{{\"text\":\"{t}\"}}]}}}}]}}}}\n\n"
                ))
            })
            .collect();
        lines.push(Ok(
            "data: {\"response\":{\"candidates\":[{\"content\":{\"parts\":[]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":7,\"candidatesTokenCount\":3}}}\n\n"
                .to_string(),
        ));
        Self::Stream(lines)
    }
}

/// Seen call
#[derive(Debug, Clone)]
pub struct SeenCall {
    pub url: String,
    pub body: Value,
    pub at: Instant,
}

/// Transport that replays scripted replies in order
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<SeenCall>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<SeenCall> {
        self.calls.lock().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.url.clone()).collect()
    }
}

#[async_trait]
impl UpstreamTransport for ScriptedTransport {
    async fn send(&self, call: UpstreamCall) -> GatewayResult<UpstreamResponse> {
        self.calls.lock().push(SeenCall {
            url: call.url,
            body: call.body,
            at: Instant::now(),
        });
        let reply = self
            .replies
            .lock()
            .pop_front()
            .ok_or_else(|| GatewayError::internal("script exhausted"))?;

        match reply {
            Reply::Status(code, body) => Ok(status_response(code, HeaderMap::new(), body)),
            Reply::StatusRetryAfter(code, secs, body) => {
                let mut headers = HeaderMap::new();
                headers.insert("retry-after", HeaderValue::from(secs));
                Ok(status_response(code, headers, body))
            }
            Reply::Stream(lines) => {
                let chunks = lines.into_iter().map(|line| line.map(Bytes::from));
                Ok(UpstreamResponse::new(
                    StatusCode::OK,
                    HeaderMap::new(),
                    Box::pin(stream::iter(chunks)),
                ))
            }
            Reply::Network(err) => Err(err),
        }
    }
}

fn status_response(code: u16, headers: HeaderMap, body: String) -> UpstreamResponse {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    UpstreamResponse::new(
        status,
        headers,
        Box::pin(stream::iter(vec![Ok(Bytes::from(body))])),
    )
}

/// Pool double that logs every notification
pub struct FakeAccountPool {
    accounts: Vec<AccountHandle>,
    script: Mutex<VecDeque<Selection>>,
    bad_credentials: HashSet<String>,
    log: Mutex<Vec<String>>,
}

impl FakeAccountPool {
    pub fn new(emails: &[&str]) -> Arc<Self> {
        Self::build(emails, &[], Vec::new())
    }

    pub fn build(emails: &[&str], bad_credentials: &[&str], script: Vec<Selection>) -> Arc<Self> {
        Arc::new(Self {
            accounts: emails.iter().map(|e| Account::new(*e).into_handle()).collect(),
            script: Mutex::new(script.into()),
            bad_credentials: bad_credentials.iter().map(ToString::to_string).collect(),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn push(&self, entry: String) {
        self.log.lock().push(entry);
    }
}

#[async_trait]
impl AccountPool for FakeAccountPool {
    fn available_accounts(&self) -> Vec<AccountHandle> {
        let now = Instant::now();
        self.accounts
            .iter()
            .filter(|a| a.is_selectable(now))
            .cloned()
            .collect()
    }

    fn select_account(&self) -> Selection {
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        let now = Instant::now();
        match self.accounts.iter().find(|a| a.is_selectable(now)) {
            Some(account) => {
                self.push(format!("select:{}", account.email()));
                Selection::Ready(Arc::clone(account))
            }
            None => Selection::Empty,
        }
    }

    async fn token_for(&self, account: &AccountHandle) -> GatewayResult<SecretString> {
        if self.bad_credentials.contains(account.email()) {
            return Err(GatewayError::invalid_credential(account.email(), "refresh failed"));
        }
        Ok(SecretString::new(format!("tok-{}", account.email())))
    }

    async fn project_for(&self, account: &AccountHandle) -> GatewayResult<String> {
        Ok(format!("proj-{}", account.email()))
    }

    fn notify_success(&self, account: &AccountHandle) {
        account.record_success();
        self.push(format!("success:{}", account.email()));
    }

    fn notify_failure(&self, account: &AccountHandle) -> u32 {
        self.push(format!("failure:{}", account.email()));
        account.record_failure()
    }

    fn notify_rate_limit(&self, account: &AccountHandle, until: Instant) {
        account.extend_rate_limit(until);
        self.push(format!("rate_limit:{}", account.email()));
    }

    fn mark_invalid(&self, account: &AccountHandle) {
        account.mark_invalid();
        self.push(format!("invalid:{}", account.email()));
    }

    fn clear_expired_limits(&self) -> usize {
        let now = Instant::now();
        self.accounts
            .iter()
            .filter(|a| a.clear_expired_limit(now))
            .count()
    }

    fn clear_credentials(&self, account: &AccountHandle) {
        self.push(format!("clear:{}", account.email()));
    }

    fn snapshot(&self) -> Vec<AccountStatus> {
        let now = Instant::now();
        self.accounts.iter().map(|a| a.status(now)).collect()
    }
}

/// Recorder that keeps every record
#[derive(Default)]
pub struct CollectingRecorder {
    records: Mutex<Vec<RequestRecord>>,
}

impl CollectingRecorder {
    pub fn records(&self) -> Vec<RequestRecord> {
        self.records.lock().clone()
    }
}

impl RequestRecorder for CollectingRecorder {
    fn record(&self, record: RequestRecord) {
        self.records.lock().push(record);
    }
}
