//! Per-request completion hook
//!
//! A request can finish on two paths: the handler's response, or the timeout
//! middleware's synthesized 408. Whichever calls [`RequestLifecycle::complete`]
//! first wins; callbacks registered with [`RequestLifecycle::on_complete`] run
//! exactly once with that status, and later completions are ignored.

use axum::{extract::Request, http::StatusCode};
use parking_lot::Mutex;
use std::sync::Arc;

type CompletionCallback = Box<dyn FnOnce(StatusCode) + Send + 'static>;

#[derive(Default)]
struct State {
    correlation_id: Option<String>,
    status: Option<StatusCode>,
    callbacks: Vec<CompletionCallback>,
}

/// Shared handle stored in the request extensions
#[derive(Clone, Default)]
pub struct RequestLifecycle {
    state: Arc<Mutex<State>>,
}

impl RequestLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lifecycle attached to `request`, attaching a new one if missing
    pub fn get_or_insert(request: &mut Request) -> Self {
        if let Some(lifecycle) = request.extensions().get::<RequestLifecycle>() {
            return lifecycle.clone();
        }
        let lifecycle = Self::new();
        request.extensions_mut().insert(lifecycle.clone());
        lifecycle
    }

    pub fn set_correlation_id(&self, id: &str) {
        self.state.lock().correlation_id = Some(id.to_string());
    }

    pub fn correlation_id(&self) -> Option<String> {
        self.state.lock().correlation_id.clone()
    }

    /// Run `callback` when the request completes. Runs immediately if it
    /// already has.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(StatusCode) + Send + 'static,
    {
        let status = {
            let mut state = self.state.lock();
            match state.status {
                Some(status) => status,
                None => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };

        callback(status);
    }

    /// Mark the request complete with `status`. Returns `false` if it was
    /// already completed, in which case nothing runs.
    pub fn complete(&self, status: StatusCode) -> bool {
        let callbacks = {
            let mut state = self.state.lock();
            if state.status.is_some() {
                return false;
            }
            state.status = Some(status);
            std::mem::take(&mut state.callbacks)
        };

        for callback in callbacks {
            callback(status);
        }
        true
    }

    /// Status the request completed with, if it has
    pub fn status(&self) -> Option<StatusCode> {
        self.state.lock().status
    }

    pub fn is_completed(&self) -> bool {
        self.status().is_some()
    }
}

impl std::fmt::Debug for RequestLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RequestLifecycle")
            .field("correlation_id", &state.correlation_id)
            .field("status", &state.status)
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}
