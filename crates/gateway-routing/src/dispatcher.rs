//! Request dispatch.
//!
//! A request moves through account selection, credential resolution and
//! an upstream call, then the outcome is classified:
//!
//! - capacity exhaustion backs off by tier and fails over to the next
//!   endpoint with the same account
//! - a rate limit parks the account and reselects
//! - a rejected credential excludes the account and reselects
//! - other failures count against the account and retry while under the
//!   failure threshold
//!
//! Once the first event of a 2xx body is decoded the stream is committed.
//! Later failures become a terminal error event, never a retry.

use crate::account::AccountHandle;
use crate::policy::DispatchPolicy;
use crate::pool::{AccountPool, Selection};
use futures::stream::{self, Stream, StreamExt};
use gateway_config::GatewayConfig;
use gateway_core::{
    AggregatedResponse, ArgumentShim, DispatchRequest, ErrorKind, EventStream, GatewayError,
    GatewayResult, NoopRecorder, PassthroughShim, RequestRecord, RequestRecorder,
    ResponseAggregator, StreamEvent, UpstreamCall, UpstreamTransport,
};
use gateway_providers::{
    classify_failure, restore_signatures, wrap_request, EndpointList, SignatureCache,
    StreamTranslator, UpstreamFailure, MAX_RETRY_HINT,
};
use gateway_resilience::BackoffPlan;
use gateway_telemetry::{dispatch_span, upstream_span};
use secrecy::SecretString;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Account plus resolved credentials, reused across endpoint failover
struct Session {
    account: AccountHandle,
    token: SecretString,
    project: String,
}

/// A committed upstream stream
struct Committed {
    events: EventStream,
    attempts: u32,
    account: String,
    url: String,
}

/// Drives requests against the upstream
pub struct Dispatcher {
    pool: Arc<dyn AccountPool>,
    transport: Arc<dyn UpstreamTransport>,
    endpoints: EndpointList,
    backoff: BackoffPlan,
    policy: DispatchPolicy,
    signatures: Arc<SignatureCache>,
    recorder: Arc<dyn RequestRecorder>,
    shim: Arc<dyn ArgumentShim>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("endpoints", &self.endpoints)
            .field("backoff", &self.backoff)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Start building a dispatcher
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// The account pool in use
    #[must_use]
    pub fn pool(&self) -> &Arc<dyn AccountPool> {
        &self.pool
    }

    /// The signature cache in use
    #[must_use]
    pub fn signatures(&self) -> &Arc<SignatureCache> {
        &self.signatures
    }

    /// Dispatch and collect the full response.
    ///
    /// # Errors
    /// Returns the classified failure when no attempt commits, or
    /// [`GatewayError::StreamTerminated`] when a committed stream ends with
    /// an error event.
    pub async fn dispatch(&self, request: DispatchRequest) -> GatewayResult<AggregatedResponse> {
        request.validate()?;
        let span = dispatch_span!(request.id, request.model);

        async move {
            let started = Instant::now();
            let committed = self.open(&request).await?;
            let attempts = committed.attempts;
            let mut events = self.recorded(committed, &request, started);

            let mut aggregator = ResponseAggregator::new();
            while let Some(item) = events.next().await {
                aggregator.push(item?)?;
                if aggregator.is_done() {
                    break;
                }
            }
            Ok(aggregator.finish(request.id.clone(), request.model.clone(), attempts))
        }
        .instrument(span)
        .await
    }

    /// Dispatch and return the live event stream.
    ///
    /// Errors before commit are returned directly. After commit the stream
    /// yields only `Ok` items and ends with `Done` or `Error`.
    ///
    /// # Errors
    /// Returns the classified failure when no attempt commits
    pub async fn dispatch_stream(&self, request: DispatchRequest) -> GatewayResult<EventStream> {
        request.validate()?;
        let span = dispatch_span!(request.id, request.model);

        let started = Instant::now();
        let committed = self.open(&request).instrument(span).await?;
        Ok(self.recorded(committed, &request, started))
    }

    fn recorded(&self, committed: Committed, request: &DispatchRequest, started: Instant) -> EventStream {
        let mut record = RequestRecord::new(request.id.clone(), committed.url, committed.attempts);
        record.status = Some(200);
        record.account = Some(committed.account);
        record.summary = true;

        let events = committed
            .events
            .map(|item| Ok(item.unwrap_or_else(|err| StreamEvent::from_error(&err))));

        RecordedStream {
            inner: events.boxed(),
            recorder: Arc::clone(&self.recorder),
            record: Some(record),
            started,
        }
        .boxed()
    }

    /// Run attempts until one commits or the request fails
    async fn open(&self, request: &DispatchRequest) -> GatewayResult<Committed> {
        let mut endpoint = 0usize;
        let mut capacity_retries = 0u32;
        let mut selection_waits = 0u32;
        let mut failure_attempts = 0u32;
        let mut rotations = 0u32;
        let mut attempts = 0u32;
        let mut session: Option<Session> = None;
        let mut last_error: Option<GatewayError> = None;

        loop {
            let current = match session.take() {
                Some(current) => current,
                None => match self.acquire(&mut selection_waits, &mut last_error).await? {
                    Some(current) => current,
                    None => continue,
                },
            };

            attempts += 1;
            let url = self.endpoints.stream_url(endpoint);
            let email = current.account.email().to_string();
            let call_started = Instant::now();
            let (status, outcome) = self
                .call(request, &current, &url)
                .instrument(upstream_span!(url, attempts))
                .await;

            let mut record = RequestRecord::new(request.id.clone(), url.clone(), attempts);
            record.status = status;
            record.account = Some(email.clone());
            record.duration = call_started.elapsed();

            let failure = match outcome {
                Ok(events) => {
                    self.pool.notify_success(&current.account);
                    self.recorder.record(record);
                    info!(attempts, account = %email, endpoint = %url, "Upstream stream committed");
                    return Ok(Committed {
                        events,
                        attempts,
                        account: email,
                        url,
                    });
                }
                Err(failure) => failure,
            };

            record.error = Some(failure.message().to_string());
            self.recorder.record(record);

            match failure {
                UpstreamFailure::CapacityExhausted { message } => {
                    warn!(
                        endpoint = %url,
                        attempt = attempts,
                        account = %email,
                        "Model capacity exhausted"
                    );
                    if !self.backoff.wait(capacity_retries).await {
                        return Err(GatewayError::retries_exhausted(attempts, message));
                    }
                    capacity_retries += 1;
                    endpoint = self.endpoints.clamp(endpoint + 1);
                    session = Some(current);
                }
                UpstreamFailure::RateLimited {
                    retry_after,
                    message,
                } => {
                    let wait = retry_after
                        .unwrap_or(self.policy.default_rate_limit)
                        .min(MAX_RETRY_HINT);
                    self.pool.notify_rate_limit(&current.account, rate_limit_deadline(wait));
                    let err = GatewayError::rate_limited(email, Some(wait), message);
                    rotations += 1;
                    if rotations > self.policy.max_rate_limit_rotations {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
                UpstreamFailure::InvalidCredential { message } => {
                    self.pool.mark_invalid(&current.account);
                    self.pool.clear_credentials(&current.account);
                    last_error = Some(GatewayError::invalid_credential(email, message));
                }
                UpstreamFailure::Transport {
                    status,
                    message,
                    retryable,
                } => {
                    let failures = self.pool.notify_failure(&current.account);
                    failure_attempts += 1;
                    let err = GatewayError::transport(message, status, retryable);
                    if !retryable
                        || failures >= self.policy.failure_threshold
                        || failure_attempts >= self.policy.max_account_attempts
                    {
                        return Err(err);
                    }
                    let delay = self
                        .backoff
                        .base_delay(failure_attempts - 1)
                        .unwrap_or_default();
                    debug!(
                        account = %email,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after upstream failure"
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(err);
                }
            }
        }
    }

    /// Select an account and resolve its credentials.
    ///
    /// `Ok(None)` means the caller should select again.
    async fn acquire(
        &self,
        selection_waits: &mut u32,
        last_error: &mut Option<GatewayError>,
    ) -> GatewayResult<Option<Session>> {
        self.pool.clear_expired_limits();

        match self.pool.select_account() {
            Selection::Ready(account) => match self.resolve(&account).await {
                Ok(session) => Ok(Some(session)),
                // Any resolution failure excludes the account; the pool
                // reports exhaustion once none are left.
                Err(err) => {
                    warn!(account = %account.email(), error = %err, "Credential resolution failed");
                    self.pool.mark_invalid(&account);
                    self.pool.clear_credentials(&account);
                    *last_error = Some(err);
                    Ok(None)
                }
            },
            Selection::Wait(wait) => {
                if wait > self.policy.max_rate_limit_wait
                    || *selection_waits >= self.policy.max_selection_waits
                {
                    return Err(GatewayError::pool_exhausted(
                        Some(wait),
                        format!("all accounts rate limited for at least {}ms", wait.as_millis()),
                    ));
                }
                *selection_waits += 1;
                info!(wait_ms = wait.as_millis() as u64, "All accounts rate limited, waiting");
                tokio::time::sleep(wait).await;
                Ok(None)
            }
            Selection::Empty => Err(GatewayError::pool_exhausted(
                None,
                last_error
                    .as_ref()
                    .map_or_else(|| "no usable accounts".to_string(), ToString::to_string),
            )),
        }
    }

    async fn resolve(&self, account: &AccountHandle) -> GatewayResult<Session> {
        let token = self.pool.token_for(account).await?;
        let project = self.pool.project_for(account).await?;
        Ok(Session {
            account: Arc::clone(account),
            token,
            project,
        })
    }

    /// One upstream attempt. Returns the status seen and either the
    /// committed stream or the classified failure.
    async fn call(
        &self,
        request: &DispatchRequest,
        session: &Session,
        url: &str,
    ) -> (Option<u16>, Result<EventStream, UpstreamFailure>) {
        let mut payload = request.payload.clone();
        restore_signatures(&mut payload, &self.signatures, request.family());
        let body = wrap_request(&session.project, &request.model, payload, &request.id);

        let call = UpstreamCall {
            url: url.to_string(),
            access_token: session.token.clone(),
            body,
        };

        let response = match self.transport.send(call).await {
            Ok(response) => response,
            Err(err) => return (None, Err(failure_from_error(&err))),
        };
        let status = Some(response.status.as_u16());

        if !response.is_success() {
            let code = response.status;
            let headers = response.headers.clone();
            let body = response.text().await.unwrap_or_default();
            return (status, Err(classify_failure(code, &headers, &body)));
        }

        let translator = StreamTranslator::new(
            request.model.clone(),
            Arc::clone(&self.signatures),
            Arc::clone(&self.shim),
        );
        let mut events = translator.translate(response.body);

        let outcome = match events.next().await {
            Some(Ok(StreamEvent::Error { kind, message })) => Err(failure_from_kind(kind, message)),
            Some(Err(err)) => Err(failure_from_error(&err)),
            Some(Ok(first)) => Ok(stream::once(async move { Ok(first) }).chain(events).boxed()),
            None => Ok(stream::empty().boxed()),
        };
        (status, outcome)
    }
}

fn rate_limit_deadline(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .or_else(|| now.checked_add(MAX_RETRY_HINT))
        .unwrap_or(now)
}

fn failure_from_error(err: &GatewayError) -> UpstreamFailure {
    match err {
        GatewayError::TransportFailure {
            message,
            status_code,
            retryable,
        } => UpstreamFailure::Transport {
            status: *status_code,
            message: message.clone(),
            retryable: *retryable,
        },
        other => UpstreamFailure::Transport {
            status: None,
            message: other.to_string(),
            retryable: other.is_retryable(),
        },
    }
}

/// Map an error event seen before commit back to a failure
fn failure_from_kind(kind: ErrorKind, message: String) -> UpstreamFailure {
    match kind {
        ErrorKind::CapacityExhausted => UpstreamFailure::CapacityExhausted { message },
        ErrorKind::RateLimited => UpstreamFailure::RateLimited {
            retry_after: None,
            message,
        },
        ErrorKind::InvalidCredential => UpstreamFailure::InvalidCredential { message },
        other => UpstreamFailure::Transport {
            status: None,
            message,
            retryable: other == ErrorKind::TransportFailure,
        },
    }
}

/// Emits the final record when the stream ends or is dropped
struct RecordedStream {
    inner: EventStream,
    recorder: Arc<dyn RequestRecorder>,
    record: Option<RequestRecord>,
    started: Instant,
}

impl RecordedStream {
    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Usage(usage) => {
                if let Some(record) = self.record.as_mut() {
                    record.input_tokens = usage.input_tokens;
                    record.output_tokens = usage.output_tokens;
                }
            }
            StreamEvent::Error { message, .. } => self.finish(Some(message.clone())),
            StreamEvent::Done { .. } => self.finish(None),
            _ => {}
        }
    }

    fn finish(&mut self, error: Option<String>) {
        if let Some(mut record) = self.record.take() {
            record.duration = self.started.elapsed();
            record.error = error;
            self.recorder.record(record);
        }
    }
}

impl Stream for RecordedStream {
    type Item = GatewayResult<StreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let poll = this.inner.as_mut().poll_next(cx);
        match &poll {
            Poll::Ready(Some(Ok(event))) => this.observe(event),
            Poll::Ready(Some(Err(err))) => this.finish(Some(err.to_string())),
            Poll::Ready(None) => this.finish(None),
            Poll::Pending => {}
        }
        poll
    }
}

impl Drop for RecordedStream {
    fn drop(&mut self) {
        self.finish(Some("stream dropped before completion".to_string()));
    }
}

/// Builder for [`Dispatcher`]
#[derive(Default)]
pub struct DispatcherBuilder {
    pool: Option<Arc<dyn AccountPool>>,
    transport: Option<Arc<dyn UpstreamTransport>>,
    endpoints: Option<EndpointList>,
    backoff: Option<BackoffPlan>,
    policy: Option<DispatchPolicy>,
    signatures: Option<Arc<SignatureCache>>,
    recorder: Option<Arc<dyn RequestRecorder>>,
    shim: Option<Arc<dyn ArgumentShim>>,
}

impl DispatcherBuilder {
    /// Apply endpoint, backoff and policy settings from configuration
    ///
    /// # Errors
    /// Returns a configuration error when no endpoint is configured
    pub fn config(mut self, config: &GatewayConfig) -> GatewayResult<Self> {
        self.endpoints = Some(EndpointList::new(&config.endpoints.urls)?);
        self.backoff = Some(DispatchPolicy::backoff_plan(&config.dispatch));
        self.policy = Some(DispatchPolicy::from_config(&config.dispatch));
        Ok(self)
    }

    /// Account pool
    #[must_use]
    pub fn pool(mut self, pool: Arc<dyn AccountPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Upstream transport
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn UpstreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Endpoint failover order
    #[must_use]
    pub fn endpoints(mut self, endpoints: EndpointList) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Capacity backoff schedule
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPlan) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Account and wait limits
    #[must_use]
    pub fn policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Shared signature cache
    #[must_use]
    pub fn signatures(mut self, signatures: Arc<SignatureCache>) -> Self {
        self.signatures = Some(signatures);
        self
    }

    /// Request record sink
    #[must_use]
    pub fn recorder(mut self, recorder: Arc<dyn RequestRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Tool argument shim
    #[must_use]
    pub fn shim(mut self, shim: Arc<dyn ArgumentShim>) -> Self {
        self.shim = Some(shim);
        self
    }

    /// Build the dispatcher
    ///
    /// # Errors
    /// Returns a configuration error when the pool or transport is missing
    pub fn build(self) -> GatewayResult<Dispatcher> {
        let pool = self
            .pool
            .ok_or_else(|| GatewayError::configuration("dispatcher requires an account pool"))?;
        let transport = self
            .transport
            .ok_or_else(|| GatewayError::configuration("dispatcher requires a transport"))?;

        Ok(Dispatcher {
            pool,
            transport,
            endpoints: self.endpoints.unwrap_or_default(),
            backoff: self.backoff.unwrap_or_default(),
            policy: self.policy.unwrap_or_default(),
            signatures: self.signatures.unwrap_or_default(),
            recorder: self.recorder.unwrap_or_else(|| Arc::new(NoopRecorder)),
            shim: self.shim.unwrap_or_else(|| Arc::new(PassthroughShim)),
        })
    }
}
