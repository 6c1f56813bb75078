//! Session context
//!
//! Per-session state that outlives any single channel and is read without
//! the engine lock: the configuration and the id allocator.

use std::time::Instant;

use super::config::{Role, SessionConfig};
use crate::registry::IdAllocator;

/// Immutable configuration plus the session's id allocator
#[derive(Debug)]
pub struct SessionContext {
    config: SessionConfig,
    ids: IdAllocator,
    started_at: Instant,
}

impl SessionContext {
    /// Create a context; the allocator flavour follows the role
    pub fn new(config: SessionConfig) -> Self {
        let ids = match config.role {
            Role::InteractiveProvider => IdAllocator::provider(),
            Role::Consumer | Role::NiProvider => IdAllocator::consumer(),
        };
        Self {
            config,
            ids,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn instance_name(&self) -> &str {
        &self.config.instance_name
    }

    pub fn is_provider(&self) -> bool {
        self.config.role == Role::InteractiveProvider
    }

    /// Time since the session was created
    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}
