//! A backend-agnostic GPU shader dispatch engine and render pipeline planner.
//!
//! Two subsystems carry the real engineering weight here:
//!
//! - [`dispatch::Dispatch`] compiles a partially built shader ([`shader_builder::ShaderBuilder`])
//!   plus a target into a backend pass, decides where each declared variable lives (push
//!   constant, uniform buffer, or a runtime-updatable global uniform) subject to the backend's
//!   limits, and caches compiled passes under a stable content signature.
//! - [`planner`] orchestrates a full frame render: reading planes, merging compatible ones,
//!   running user hooks, scaling, color-mapping, and writing subsampled output planes, with a
//!   per-capability degradation latch so losing one optional feature never aborts the whole call.
//!
//! Everything GPU-shaped — textures, buffers, compiled passes, the backend itself — is an opaque
//! trait object behind [`gpu::Backend`] and friends; this crate never talks to Vulkan/GL/etc.
//! directly, the same way `autograph_render`'s `RendererBackend` keeps the renderer backend-blind.

pub mod cache;
pub mod codegen;
pub mod dispatch;
pub mod error;
pub mod frame_model;
pub mod gpu;
pub mod mixer;
pub mod placement;
pub mod planner;
pub mod pool;
pub mod shader_builder;
#[cfg(test)]
mod testutil;
pub mod typedesc;

pub use dispatch::Dispatch;
pub use error::{Error, Result};
