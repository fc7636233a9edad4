//! Per-worker request queues.
//!
//! Every worker thread owns one bounded queue, so workers never contend on
//! a shared receiver. The accept loop spreads requests round-robin.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel;

use crate::serve::RequestData;

/// The queues of every worker.
pub(crate) struct WorkerQueues {
    senders: Vec<channel::Sender<RequestData>>,
    receivers: Vec<channel::Receiver<RequestData>>,
    /// Shared round-robin counter across all senders for even distribution.
    next_worker: Arc<AtomicUsize>,
}

impl WorkerQueues {
    pub(crate) fn new(num_workers: usize, capacity_per_worker: usize) -> Self {
        let mut senders = Vec::with_capacity(num_workers);
        let mut receivers = Vec::with_capacity(num_workers);

        for _ in 0..num_workers {
            let (tx, rx) = channel::bounded(capacity_per_worker);
            senders.push(tx);
            receivers.push(rx);
        }

        Self {
            senders,
            receivers,
            next_worker: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A sender that round-robins across workers.
    pub(crate) fn get_sender(&self) -> WorkerSender {
        WorkerSender {
            senders: self.senders.clone(),
            next_worker: self.next_worker.clone(),
        }
    }

    /// Take the receivers, one per worker, leaving none behind.
    ///
    /// Once the returned receivers and every sender are dropped the
    /// queues disconnect and idle workers exit.
    pub(crate) fn take_receivers(&mut self) -> Vec<channel::Receiver<RequestData>> {
        std::mem::take(&mut self.receivers)
    }
}

/// A sender that distributes requests across workers using round-robin
#[derive(Clone)]
pub(crate) struct WorkerSender {
    senders: Vec<channel::Sender<RequestData>>,
    next_worker: Arc<AtomicUsize>,
}

impl WorkerSender {
    /// Non-blocking send that hands the request back when the target queue
    /// is full. Used from async context to avoid blocking tokio threads.
    #[allow(clippy::result_large_err)]
    pub(crate) fn try_send(&self, data: RequestData) -> Result<(), channel::TrySendError<RequestData>> {
        if self.senders.is_empty() {
            return Err(channel::TrySendError::Disconnected(data));
        }
        let worker = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        self.senders[worker].try_send(data)
    }
}
