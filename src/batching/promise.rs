// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-assignment result slots.
//!
//! The writer half is consumed by [`ResultSlot::fulfill`], so a slot can be
//! filled at most once. Dropping the writer unfilled wakes the reader with
//! `None`.

use tokio::sync::oneshot;

/// Create a connected writer/reader pair.
#[must_use]
pub fn result_slot<T>() -> (ResultSlot<T>, PendingResult<T>) {
    let (tx, rx) = oneshot::channel();
    (ResultSlot(tx), PendingResult(rx))
}

/// Writer half, owned by whoever produces the result.
#[derive(Debug)]
pub struct ResultSlot<T>(oneshot::Sender<T>);

impl<T> ResultSlot<T> {
    /// Deliver the result. Returns false if the reader has gone away.
    pub fn fulfill(self, value: T) -> bool {
        self.0.send(value).is_ok()
    }

    /// Whether the reader has been dropped
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.0.is_closed()
    }
}

/// Reader half, awaited by the caller.
#[derive(Debug)]
pub struct PendingResult<T>(oneshot::Receiver<T>);

impl<T> PendingResult<T> {
    /// Wait for the result; `None` if the writer was dropped unfilled.
    pub async fn wait(self) -> Option<T> {
        self.0.await.ok()
    }
}
