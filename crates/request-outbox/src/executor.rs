//! Direct and queued execution of remote calls.
//!
//! Both disciplines wait on the connectivity gate before every attempt and
//! classify failures the same way. They differ in what a network failure
//! does:
//!
//! - **Direct**: report OFFLINE and try again, in-process, until the call
//!   succeeds or fails for an application reason. The queue is never touched.
//! - **Queued**: report OFFLINE and give up for now. The entry stays queued
//!   and the next replay picks it up. Success and application failure both
//!   remove the entry.

use crate::claims::InFlightClaim;
use crate::{
    ConnectivityMonitor, DirectRequest, EventBus, Outcome, OutboxEvent, PendingRequest,
    QueueStore, RequestDescriptor, Transport, TransportError,
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry behaviour of the direct executor on network failures.
///
/// The default retries forever with no delay beyond the connectivity gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts before a network failure becomes terminal.
    /// `None` retries without bound.
    pub max_attempts: Option<u32>,
    /// Base delay for exponential backoff. Zero disables backoff.
    pub backoff_base: Duration,
    /// Cap on the backoff delay.
    pub backoff_max: Duration,
}

impl RetryPolicy {
    /// Retry forever, no backoff.
    pub fn unbounded() -> Self {
        Self::default()
    }

    fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }

    /// Delay before the attempt following failed attempt number `attempt`.
    ///
    /// `base * 2^(attempt - 1)`, capped at `backoff_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.backoff_base.is_zero() {
            return Duration::ZERO;
        }

        let base_ms = self.backoff_base.as_millis() as u64;
        let max_ms = self.backoff_max.as_millis() as u64;
        let multiplier = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms.max(base_ms));

        Duration::from_millis(delay_ms)
    }
}

/// Runs calls against the transport, gated on connectivity.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn Transport>,
    connectivity: ConnectivityMonitor,
    bus: EventBus,
    queue: Arc<QueueStore>,
    retry: RetryPolicy,
}

impl Executor {
    pub fn new(
        transport: Arc<dyn Transport>,
        connectivity: ConnectivityMonitor,
        bus: EventBus,
        queue: Arc<QueueStore>,
    ) -> Self {
        Self {
            transport,
            connectivity,
            bus,
            queue,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run an ad-hoc call, retrying on network failures.
    ///
    /// Emits exactly one outcome: `T_SUCCESS` with the response, or `T_ERROR`
    /// with the error message. Network failures emit OFFLINE and are retried
    /// according to the retry policy.
    pub async fn execute_direct<P, F, Fut>(
        &self,
        call: F,
        request: &DirectRequest<P>,
    ) -> Result<Value, TransportError>
    where
        P: Clone,
        F: Fn(P) -> Fut,
        Fut: Future<Output = Result<Value, TransportError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            self.connectivity.wait_until_online().await;
            attempt += 1;

            match call(request.params.clone()).await {
                Ok(response) => {
                    debug!(base_type = %request.base_type, attempt, "Direct request succeeded");
                    self.publish_success(&request.base_type, response.clone(), None);
                    return Ok(response);
                }
                Err(err) if err.is_network() => {
                    warn!(
                        base_type = %request.base_type,
                        attempt,
                        error = %err,
                        "Direct request hit a network failure"
                    );
                    self.connectivity.report_offline();

                    if self.retry.is_exhausted(attempt) {
                        warn!(
                            base_type = %request.base_type,
                            attempt,
                            "Retry limit reached, giving up"
                        );
                        self.publish_failure(&request.base_type, &err);
                        return Err(err);
                    }

                    let delay = self.retry.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    info!(
                        base_type = %request.base_type,
                        error = %err,
                        "Direct request failed"
                    );
                    self.publish_failure(&request.base_type, &err);
                    return Err(err);
                }
            }
        }
    }

    /// Run a descriptor through the configured transport with direct
    /// semantics.
    pub async fn send(
        &self,
        request: &DirectRequest<RequestDescriptor>,
    ) -> Result<Value, TransportError> {
        let transport = self.transport.clone();
        self.execute_direct(
            move |descriptor: RequestDescriptor| {
                let transport = transport.clone();
                async move { transport.perform(&descriptor).await }
            },
            request,
        )
        .await
    }

    /// Run one queued entry once.
    ///
    /// On a network failure the entry stays queued and no outcome is emitted.
    pub async fn execute_queued(&self, entry: &PendingRequest) -> Result<Value, TransportError> {
        self.run_queued(entry, None).await
    }

    /// Queued execution holding an in-flight claim on the entry.
    ///
    /// The claim is released before OFFLINE is raised, so a replay triggered
    /// by the following ONLINE can pick the entry up again. On terminal
    /// completion it is released only after the entry has been dequeued.
    pub(crate) async fn run_queued(
        &self,
        entry: &PendingRequest,
        claim: Option<InFlightClaim>,
    ) -> Result<Value, TransportError> {
        self.connectivity.wait_until_online().await;

        match self.transport.perform(&entry.descriptor).await {
            Ok(response) => {
                debug!(
                    request_id = %entry.id,
                    base_type = %entry.base_type,
                    "Queued request succeeded"
                );
                self.publish_success(&entry.base_type, response.clone(), Some(entry.clone()));
                self.queue.dequeue_by_id(&entry.id).await;
                drop(claim);
                Ok(response)
            }
            Err(err) if err.is_network() => {
                warn!(
                    request_id = %entry.id,
                    base_type = %entry.base_type,
                    error = %err,
                    "Queued request hit a network failure, leaving it queued"
                );
                drop(claim);
                self.connectivity.report_offline();
                Err(err)
            }
            Err(err) => {
                warn!(
                    request_id = %entry.id,
                    base_type = %entry.base_type,
                    error = %err,
                    "Queued request failed, dropping it"
                );
                self.publish_failure(&entry.base_type, &err);
                self.queue.dequeue_by_id(&entry.id).await;
                drop(claim);
                Err(err)
            }
        }
    }

    fn publish_success(&self, base_type: &str, payload: Value, parent: Option<PendingRequest>) {
        self.bus.publish(OutboxEvent::Outcome(Outcome::Success {
            base_type: base_type.to_string(),
            payload,
            parent,
        }));
    }

    fn publish_failure(&self, base_type: &str, err: &TransportError) {
        self.bus.publish(OutboxEvent::Outcome(Outcome::Failure {
            base_type: base_type.to_string(),
            error: err.to_string(),
        }));
    }
}
