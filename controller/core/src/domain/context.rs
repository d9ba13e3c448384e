// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cancellable operation context handed to every generator call.
//!
//! Generator operations talk to external backends; the context carries the
//! caller's cancellation signal and deadline so a single reconciliation
//! pass never outlives its worker.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::generator::GeneratorError;

#[derive(Debug, Clone)]
pub struct OperationContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OperationContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Derive a context that is cancelled with the parent and expires after
    /// `timeout` (or at the parent's deadline, whichever comes first).
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let own = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline,
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Race `fut` against cancellation and the deadline.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, GeneratorError>
    where
        F: Future<Output = Result<T, GeneratorError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(GeneratorError::Cancelled);
        }
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = fut => result,
            _ = self.cancel.cancelled() => Err(GeneratorError::Cancelled),
            _ = deadline => Err(GeneratorError::DeadlineExceeded),
        }
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::background()
    }
}
