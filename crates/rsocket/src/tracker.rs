//! Correlation of outstanding request-response calls.

use crate::error::{ConnectionError, Error, ResourceError, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rsocket_protocol::{Payload, RequestId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::debug;

/// What a pending request eventually resolves to.
pub type Outcome = Result<Payload>;

/// Table of request-response calls awaiting a reply on one connection.
///
/// Registration happens on the caller's task and resolution on the
/// connection's reader task, so the table is a concurrent map. Each entry
/// owns the sending half of a oneshot channel; removing the entry is what
/// makes delivery happen at most once.
#[derive(Debug)]
pub struct RequestTracker {
    pending: DashMap<RequestId, oneshot::Sender<Outcome>>,
    next_id: AtomicU32,
    closed: AtomicBool,
    /// Entries inserted or about to be; never exceeds `max_pending`.
    slots: AtomicUsize,
    max_pending: usize,
}

impl RequestTracker {
    /// Create an empty tracker admitting at most `max_pending` entries.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU32::new(1),
            closed: AtomicBool::new(false),
            slots: AtomicUsize::new(0),
            max_pending,
        }
    }

    /// Allocate a fresh id and the receiver its outcome will arrive on.
    ///
    /// Ids increase monotonically and wrap after `u32::MAX`, skipping `0`
    /// and any id that is still pending.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] once the tracker has been drained
    /// and [`ResourceError::TooManyPending`] when the table is full.
    pub fn register(&self) -> Result<(RequestId, oneshot::Receiver<Outcome>)> {
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }

        let max = self.max_pending;
        let reserved = self
            .slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < max).then_some(used + 1)
            });
        if let Err(current) = reserved {
            return Err(ResourceError::TooManyPending { current, max }.into());
        }

        let (tx, rx) = oneshot::channel();
        let id = loop {
            let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            if !id.is_tracked() {
                continue;
            }
            if let Entry::Vacant(slot) = self.pending.entry(id) {
                slot.insert(tx);
                break id;
            }
        };

        // A drain that ran concurrently may have missed this entry
        if self.is_closed() {
            self.remove(id);
            return Err(ConnectionError::Closed.into());
        }

        Ok((id, rx))
    }

    /// Deliver the outcome for `id`.
    ///
    /// Returns `false` if `id` is unknown or already resolved; the outcome
    /// is then dropped and nothing else changes.
    pub fn resolve(&self, id: RequestId, outcome: Outcome) -> bool {
        match self.remove(id) {
            Some(tx) => {
                // The caller may have stopped waiting; the entry still counts as resolved
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Forget `id` without delivering anything.
    pub fn discard(&self, id: RequestId) -> bool {
        self.remove(id).is_some()
    }

    fn remove(&self, id: RequestId) -> Option<oneshot::Sender<Outcome>> {
        let (_, tx) = self.pending.remove(&id)?;
        self.slots.fetch_sub(1, Ordering::AcqRel);
        Some(tx)
    }

    /// Resolve every pending entry with `reason` and refuse new ones.
    ///
    /// Returns how many entries were resolved.
    pub fn drain_all(&self, reason: &Error) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let drained = ids
            .into_iter()
            .filter(|id| self.resolve(*id, Err(reason.clone())))
            .count();

        if drained > 0 {
            debug!("Drained {} pending requests: {}", drained, reason);
        }
        drained
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no entries are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether `id` is pending.
    #[must_use]
    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Whether the tracker has been drained.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Completion handle for one request-response call.
///
/// Resolves exactly once, with the response payload or the error that ended
/// the call. Dropping the handle before it resolves removes the pending
/// entry; a reply arriving afterwards is treated as an unknown id.
#[derive(Debug)]
#[must_use = "a response handle does nothing unless awaited"]
pub struct ResponseHandle {
    id: RequestId,
    rx: oneshot::Receiver<Outcome>,
    tracker: Arc<RequestTracker>,
    finished: bool,
}

impl ResponseHandle {
    pub(crate) const fn new(
        id: RequestId,
        rx: oneshot::Receiver<Outcome>,
        tracker: Arc<RequestTracker>,
    ) -> Self {
        Self {
            id,
            rx,
            tracker,
            finished: false,
        }
    }

    /// The id this call was sent with.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.id
    }
}

impl Future for ResponseHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(outcome) => {
                this.finished = true;
                // A dropped sender means the entry vanished without an outcome
                Poll::Ready(outcome.unwrap_or_else(|_| Err(ConnectionError::Closed.into())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker.discard(self.id);
        }
    }
}
