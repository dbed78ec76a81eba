//! Bounded async channel used for fork/join and producer/consumer opcodes
//!
//!
//! Grounded on `original_source/tests/unit/async_features/test_channel.py`
//! for the exact surface (`send`/`receive`/`send_nowait`/`try_receive`,
//! `close`/`closed`, `len`/`empty`/`full`) and on `bpmn-lite-core/src/vm.rs`'s
//! manual `Mutex` + `Notify` style for how shared mutable runtime state is
//! guarded without pulling in a second queue crate.
//!
//! `maxsize == 0` is a rendezvous: `send` blocks until a concurrent
//! `receive` actually takes the value, realized with a one-shot ack per
//! send rather than a buffer slot. This is the deliberate inverse of
//! Python's `asyncio.Queue(maxsize=0)`, which means unbounded — see
//! DESIGN.md's Open Question #2.

use std::collections::VecDeque;

use tokio::sync::{oneshot, Mutex, Notify};

use crate::error::{ErrorContext, LexFlowError, Result};
use crate::value::Value;

struct Inner {
    queue: VecDeque<Value>,
    closed: bool,
    /// Acks owed to rendezvous senders still waiting on their value being
    /// taken, in FIFO order with the value they're holding.
    rendezvous_waiters: VecDeque<oneshot::Sender<()>>,
}

/// A bounded, closable FIFO queue of `Value`s shared across tasks via
/// `Arc<Channel>`.
pub struct Channel {
    maxsize: usize,
    inner: Mutex<Inner>,
    not_full: Notify,
    not_empty: Notify,
}

impl Channel {
    pub fn new(maxsize: usize) -> Self {
        Channel {
            maxsize,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
                rendezvous_waiters: VecDeque::new(),
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
        }
    }

    pub fn is_rendezvous(&self) -> bool {
        self.maxsize == 0
    }

    /// Send `value`, waiting for capacity (or, in rendezvous mode, for a
    /// receiver to actually take it) if necessary.
    pub async fn send(&self, value: Value) -> Result<()> {
        if self.is_rendezvous() {
            return self.send_rendezvous(value).await;
        }
        loop {
            {
                let mut guard = self.inner.lock().await;
                if guard.closed {
                    return Err(LexFlowError::SendOnClosed {
                        context: ErrorContext::new(),
                    });
                }
                if guard.queue.len() < self.maxsize {
                    guard.queue.push_back(value);
                    drop(guard);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            self.not_full.notified().await;
        }
    }

    async fn send_rendezvous(&self, value: Value) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut guard = self.inner.lock().await;
            if guard.closed {
                return Err(LexFlowError::SendOnClosed {
                    context: ErrorContext::new(),
                });
            }
            guard.queue.push_back(value);
            guard.rendezvous_waiters.push_back(ack_tx);
        }
        self.not_empty.notify_one();
        // Waits for `receive` to actually dequeue this value.
        let _ = ack_rx.await;
        Ok(())
    }

    /// Attempt to send without waiting; returns `Ok(false)` if the channel
    /// is currently full (or, in rendezvous mode, has no waiting receiver).
    pub async fn send_nowait(&self, value: Value) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(LexFlowError::SendOnClosed {
                context: ErrorContext::new(),
            });
        }
        let capacity_free = if self.is_rendezvous() {
            guard.queue.is_empty()
        } else {
            guard.queue.len() < self.maxsize
        };
        if !capacity_free {
            return Ok(false);
        }
        guard.queue.push_back(value);
        drop(guard);
        self.not_empty.notify_one();
        Ok(true)
    }

    /// Receive the next value, waiting if the channel is currently empty.
    /// Returns `Ok(None)` once the channel is closed and fully drained.
    pub async fn receive(&self) -> Result<Option<Value>> {
        loop {
            {
                let mut guard = self.inner.lock().await;
                if let Some(value) = guard.queue.pop_front() {
                    if let Some(ack) = guard.rendezvous_waiters.pop_front() {
                        let _ = ack.send(());
                    }
                    drop(guard);
                    self.not_full.notify_one();
                    return Ok(Some(value));
                }
                if guard.closed {
                    return Ok(None);
                }
            }
            self.not_empty.notified().await;
        }
    }

    /// Attempt to receive without waiting; `Ok(None)` means "nothing ready
    /// right now", which is ambiguous between empty-but-open and
    /// closed-and-drained — callers that care should check `is_closed()`.
    pub async fn try_receive(&self) -> Option<Value> {
        let mut guard = self.inner.lock().await;
        let value = guard.queue.pop_front();
        if value.is_some() {
            if let Some(ack) = guard.rendezvous_waiters.pop_front() {
                let _ = ack.send(());
            }
            drop(guard);
            self.not_full.notify_one();
        }
        value
    }

    /// Close the channel. Pending `send`s already queued are still
    /// delivered; new `send`s fail with `SendOnClosed`.
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        guard.closed = true;
        drop(guard);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }

    pub async fn is_full(&self) -> bool {
        if self.is_rendezvous() {
            return false;
        }
        self.inner.lock().await.queue.len() >= self.maxsize
    }
}
