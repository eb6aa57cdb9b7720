//! Retry-exhaustion reconciliation.
//!
//! When the queue gives up on a message, the job may still be Pending or
//! Processing. The reconciler listens for [`QueueEvent::Exhausted`] and forces
//! such jobs to Failed so none is left in flight forever.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{Span, debug, info, warn};

use fulfill_core::Job;
use fulfill_queue::{QueueEvent, Subscription, SubscriptionError};

use crate::store::{JobStore, JobStoreError, Mutated, Transition, update_with_retry};

/// Error text recorded on a job whose attempts ran out.
pub fn exhaustion_message(attempts: u32, error: &str) -> String {
    format!("Job failed after {attempts} attempts: {error}")
}

pub struct ExhaustionReconciler {
    store: Arc<dyn JobStore>,
    span: Span,
}

impl ExhaustionReconciler {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// React to one queue event. Returns the job when it was force-failed.
    pub async fn handle(&self, event: &QueueEvent) -> Result<Option<Job>, JobStoreError> {
        match event {
            QueueEvent::Completed { message, attempt } => {
                debug!(
                    parent: &self.span,
                    request_id = %message.request_id,
                    attempt,
                    "delivery completed"
                );
                Ok(None)
            }
            QueueEvent::Failed {
                message,
                attempt,
                error,
                will_retry,
            } => {
                warn!(
                    parent: &self.span,
                    request_id = %message.request_id,
                    attempt,
                    will_retry,
                    error = %error,
                    "delivery attempt failed"
                );
                Ok(None)
            }
            QueueEvent::Exhausted {
                message,
                attempts,
                error,
            } => {
                let reason = exhaustion_message(*attempts, error);
                let result = update_with_retry(&*self.store, message.request_id, |job| {
                    if job.is_terminal() {
                        return Transition::Skip;
                    }
                    match job.fail(reason.clone()) {
                        Ok(()) => Transition::Write,
                        Err(_) => Transition::Skip,
                    }
                })
                .await;

                match result {
                    Ok(Mutated::Updated(job)) => {
                        warn!(
                            parent: &self.span,
                            request_id = %job.request_id,
                            attempts,
                            error = %reason,
                            "job failed after exhausting attempts"
                        );
                        Ok(Some(job))
                    }
                    Ok(Mutated::Unchanged(job)) => {
                        debug!(
                            parent: &self.span,
                            request_id = %job.request_id,
                            status = %job.status,
                            "exhausted job already finished"
                        );
                        Ok(None)
                    }
                    Err(JobStoreError::NotFound(request_id)) => {
                        warn!(parent: &self.span, %request_id, "exhausted message has no job");
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Consume events until `stop` flips, then drain what is already buffered.
    pub async fn run(self, mut subscription: Subscription<QueueEvent>, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                next = subscription.recv() => match next {
                    Ok(event) => self.handle_logged(&event).await,
                    Err(SubscriptionError::Lagged(missed)) => {
                        warn!(parent: &self.span, missed, "reconciler lagged behind queue events");
                    }
                    Err(_) => break,
                },
                _ = stop.changed() => {
                    while let Ok(event) = subscription.try_recv() {
                        self.handle_logged(&event).await;
                    }
                    break;
                }
            }
        }
        info!(parent: &self.span, "reconciler stopped");
    }

    async fn handle_logged(&self, event: &QueueEvent) {
        if let Err(err) = self.handle(event).await {
            warn!(
                parent: &self.span,
                request_id = %event.message().request_id,
                event = event.kind(),
                error = %err,
                "failed to reconcile queue event"
            );
        }
    }
}
