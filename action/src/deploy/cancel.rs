//! Cooperative cancellation tokens
//!
//! A token is cancelled once and stays cancelled. Child tokens are cancelled
//! together with their parent but can be cancelled on their own without
//! affecting it. A fresh token from [`CancellationToken::new`] shares nothing
//! with any other token, which is what cleanup paths use so they still run
//! after the primary operation has been cancelled.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

struct Inner {
    state: watch::Sender<bool>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn cancel(&self) {
        if self.state.send_replace(true) {
            return;
        }

        let children = match self.children.lock() {
            Ok(mut children) => std::mem::take(&mut *children),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Cancellation signal shared between a supervisor and a running operation
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create an independent, uncancelled token
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Derive a token that is cancelled when this one is
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        match self.inner.children.lock() {
            Ok(mut children) => {
                children.retain(|c| c.strong_count() > 0);
                children.push(Arc::downgrade(&child.inner));
            }
            Err(poisoned) => poisoned.into_inner().push(Arc::downgrade(&child.inner)),
        }
        // the parent may have been cancelled before we registered
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Cancel this token and every child derived from it
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.inner.state.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
