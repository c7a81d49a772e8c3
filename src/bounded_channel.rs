// SPDX-License-Identifier: Apache-2.0

use flume::{Receiver, Sender, TrySendError};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Producer behavior when the channel is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Discard the item being offered.
    #[default]
    DropNewest,
    /// Evict the oldest queued item to make room.
    DropOldest,
    /// Wait until the consumer frees space.
    Block,
}

/// What happened to an item handed to [`BoundedSender::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    /// The offered item was discarded.
    DroppedNewest,
    /// The item was queued after evicting the oldest one.
    DroppedOldest,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Closed,
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed => write!(f, "channel closed"),
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

pub struct BoundedSender<T> {
    tx: Sender<T>,
    // Only held for DropOldest, so the sender side can evict the head.
    evict: Option<Receiver<T>>,
    policy: DropPolicy,
    closed: Arc<AtomicBool>,
}

impl<T> BoundedSender<T> {
    /// Offers an item according to the channel's drop policy. Only the
    /// Block policy ever waits.
    pub async fn send(&self, item: T) -> Result<SendOutcome, SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }

        match self.policy {
            DropPolicy::Block => match self.tx.send_async(item).await {
                Ok(()) => Ok(SendOutcome::Accepted),
                Err(_e) => Err(SendError::Disconnected), // receiver closed
            },
            _ => self.try_send(item),
        }
    }

    /// Non-waiting send. Under the Block policy a full channel drops the
    /// offered item.
    pub fn try_send(&self, item: T) -> Result<SendOutcome, SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }

        let mut item = item;
        let mut evicted = false;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    return Ok(if evicted {
                        SendOutcome::DroppedOldest
                    } else {
                        SendOutcome::Accepted
                    });
                }
                Err(TrySendError::Disconnected(_)) => return Err(SendError::Disconnected),
                Err(TrySendError::Full(returned)) => match &self.evict {
                    Some(evict) if self.policy == DropPolicy::DropOldest => {
                        // The consumer may have drained the head in the meantime,
                        // either way there is room on the next attempt.
                        let _ = evict.try_recv();
                        evicted = true;
                        item = returned;
                    }
                    _ => return Ok(SendOutcome::DroppedNewest),
                },
            }
        }
    }

    /// Refuses all further sends. Items already queued remain readable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> DropPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            evict: self.evict.clone(),
            policy: self.policy,
            closed: self.closed.clone(),
        }
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
    closed: Arc<AtomicBool>,
}

impl<T> BoundedReceiver<T> {
    pub async fn next(&mut self) -> Option<T> {
        match self.rx.recv_async().await {
            Ok(item) => Some(item),
            Err(_e) => None, // disconnected
        }
    }

    /// Non-blocking receive - returns immediately.
    /// Returns None if no item is available or channel is disconnected.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Drains whatever is currently queued.
    pub fn drain(&self) -> Vec<T> {
        self.rx.drain().collect()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    bounded_with_policy(size, DropPolicy::Block)
}

pub fn bounded_with_policy<T>(
    size: usize,
    policy: DropPolicy,
) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);
    let closed = Arc::new(AtomicBool::new(false));

    let evict = match policy {
        DropPolicy::DropOldest => Some(rx.clone()),
        _ => None,
    };

    let sender = BoundedSender {
        tx,
        evict,
        policy,
        closed: closed.clone(),
    };
    let receiver = BoundedReceiver { rx, closed };

    (sender, receiver)
}
