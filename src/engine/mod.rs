//! Contracts of the analytics engine collaborator.
//!
//! The pipeline only talks to these traits; `memory` provides a working
//! in-process engine behind them.

pub mod hypercube;
pub mod memory;
pub mod script;
mod subscription;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::connection::ConnectionHandle;
use crate::models::ObjectDefinition;

pub use memory::MemoryEngine;
pub use subscription::{LayoutPublisher, LayoutSubscription};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("failed to connect to {url}: {message}")]
    Connection { url: String, message: String },
    #[error("{method} rejected: {message}")]
    Rejected {
        method: &'static str,
        message: String,
    },
    #[error("app {app_id} has no data loaded")]
    NotLoaded { app_id: String },
    #[error("engine session closed")]
    Closed,
}

impl EngineError {
    pub fn rejected(method: &'static str, message: impl Into<String>) -> Self {
        EngineError::Rejected {
            method,
            message: message.into(),
        }
    }
}

/// Entry point of the collaborator: turns a connection handle into a session.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn open(&self, handle: &ConnectionHandle) -> Result<Arc<dyn Session>, EngineError>;
}

#[async_trait]
pub trait Session: Send + Sync {
    /// Creates a disposable app that lives only as long as this session.
    async fn create_session_app(&self) -> Result<Arc<dyn App>, EngineError>;
}

#[async_trait]
pub trait App: Send + Sync {
    fn id(&self) -> &str;

    async fn set_script(&self, script: &str) -> Result<(), EngineError>;

    /// Runs the current load script. `Ok(false)` means the engine executed
    /// the request but the script did not load.
    async fn do_reload(&self) -> Result<bool, EngineError>;

    async fn create_session_object(
        &self,
        definition: &ObjectDefinition,
    ) -> Result<Arc<dyn Model>, EngineError>;
}

#[async_trait]
pub trait Model: Send + Sync {
    fn id(&self) -> &str;

    /// Subscribes to layout changes. The current layout is delivered first,
    /// followed by one layout per change notification.
    async fn subscribe_layout(&self) -> Result<LayoutSubscription, EngineError>;
}
