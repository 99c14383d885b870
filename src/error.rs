//! Shared error type for the whole crate.
//!
//! Grounded on `render/src/error.rs`'s shared `Error` enum, upgraded to a real `thiserror::Error`
//! derive following the pattern `graal::Error` (ennis-fluff) and `graphics-backend`'s
//! `thiserror`-based errors use — see SPEC_FULL.md §1.1.

use crate::gpu::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(&'static str),

    #[error("required capability unavailable: {0}")]
    CapabilityShortfall(&'static str),

    #[error("backend allocation failed: {0}")]
    Backend(#[from] BackendError),

    #[error("no variable placement satisfies the backend's limits for `{0}`")]
    PlacementFailed(String),

    #[error("device lost")]
    DeviceLost,
}

pub type Result<T> = std::result::Result<T, Error>;
