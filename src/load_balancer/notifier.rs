//! Completion notifier.
//!
//! Forwards report completion by sending the backend on an unbounded
//! channel; a single consumer task rebalances the pool for each event. The
//! request path never waits on rebalancing, and rebalancing only contends on
//! the pool lock.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::load_balancer::backend::Backend;
use crate::load_balancer::pool::Pool;
use crate::observability::metrics;

/// A finished forward.
#[derive(Debug)]
pub struct Completion {
    pub backend: Arc<Backend>,
    pub elapsed: Duration,
}

/// Producer side, cloned into every in-flight request.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<Completion>,
}

impl CompletionSender {
    /// Report a finished forward. Never blocks.
    pub fn notify(&self, completion: Completion) {
        if let Err(mpsc::error::SendError(lost)) = self.tx.send(completion) {
            tracing::error!(
                backend = %lost.backend.id(),
                upstream = %lost.backend.upstream(),
                "Completion notifier stopped, load not rebalanced"
            );
        }
    }
}

/// Consumer side. Run it with [`CompletionNotifier::run`].
#[derive(Debug)]
pub struct CompletionNotifier {
    rx: mpsc::UnboundedReceiver<Completion>,
    pool: Arc<Pool>,
    completed: watch::Sender<u64>,
}

/// Create a notifier for `pool`.
///
/// The returned receiver observes the running total of rebalanced
/// completions.
pub fn channel(pool: Arc<Pool>) -> (CompletionSender, CompletionNotifier, watch::Receiver<u64>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (completed, completed_rx) = watch::channel(0);
    (
        CompletionSender { tx },
        CompletionNotifier {
            rx,
            pool,
            completed,
        },
        completed_rx,
    )
}

impl CompletionNotifier {
    /// Rebalance until every sender is gone.
    pub async fn run(mut self) {
        tracing::debug!("Completion notifier started");
        while let Some(completion) = self.rx.recv().await {
            self.rebalance(completion);
        }
        tracing::debug!("Completion notifier stopped");
    }

    fn rebalance(&self, completion: Completion) {
        let backend = &completion.backend;
        match self.pool.release(backend) {
            Ok(load) => {
                tracing::trace!(
                    backend = %backend.id(),
                    load,
                    elapsed_ms = completion.elapsed.as_millis() as u64,
                    "Backend rebalanced"
                );
                metrics::record_completion(backend, load, completion.elapsed);
            }
            Err(e) => {
                tracing::error!(
                    backend = %backend.id(),
                    upstream = %backend.upstream(),
                    error = %e,
                    "Pool invariant violated while rebalancing"
                );
            }
        }
        self.completed.send_modify(|total| *total += 1);
    }
}
