//! Shared application state type.
//!
//! Defines the `AppState` type used across all handlers and routers.

use crate::bootstrap::AxumContext;
use std::sync::Arc;

/// Application state shared across all handlers.
///
/// An Arc-wrapped `AxumContext` carrying the collaborator ports, the
/// speech pipeline pieces, and the per-call hub registry.
pub type AppState = Arc<AxumContext>;
