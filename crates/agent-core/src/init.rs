//! One-time lazy initialization with observable state.
//!
//! Concurrent callers of [`LazyInit::get_or_try_init`] wait on a single
//! initializer; a failed attempt is recorded and retried by the next caller.

use std::future::Future;
use std::sync::Mutex;

use serde::Serialize;

use crate::error::Result;

/// Initialization state
#[derive(Clone, Debug)]
pub enum InitState<T> {
    Uninitialized,
    Initializing,
    Ready(T),
    Failed(String),
}

/// State without the payload, for health reporting
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum InitStatus {
    Uninitialized,
    Initializing,
    Ready,
    Failed(String),
}

pub struct LazyInit<T> {
    state: Mutex<InitState<T>>,
    gate: tokio::sync::Mutex<()>,
}

impl<T: Clone> Default for LazyInit<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> LazyInit<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InitState::Uninitialized),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn status(&self) -> InitStatus {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            InitState::Uninitialized => InitStatus::Uninitialized,
            InitState::Initializing => InitStatus::Initializing,
            InitState::Ready(_) => InitStatus::Ready,
            InitState::Failed(e) => InitStatus::Failed(e.clone()),
        }
    }

    /// Value if initialization already succeeded
    pub fn get(&self) -> Option<T> {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            InitState::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Return the ready value or run `init` exactly once at a time
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let _gate = self.gate.lock().await;
        if let Some(value) = self.get() {
            return Ok(value);
        }

        self.set(InitState::Initializing);
        match init().await {
            Ok(value) => {
                self.set(InitState::Ready(value.clone()));
                Ok(value)
            }
            Err(e) => {
                tracing::error!(error = %e, "Initialization failed");
                self.set(InitState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn set(&self, state: InitState<T>) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}
