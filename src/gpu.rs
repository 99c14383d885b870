//! The external GPU abstraction this crate renders against.
//!
//! Everything in this module is a *collaborator*, not something this crate implements: a real
//! backend (Vulkan, GL, a software rasterizer, a test double) provides concrete types behind
//! these traits. The dispatch engine and render planner only ever see `&dyn Texture`,
//! `&dyn Buffer`, `&dyn Pass`, and the handful of enumeration/query methods on [`Backend`].
//!
//! Modeled on `autograph_render::traits` / `RendererBackend`: a capability trait standing in for
//! what would otherwise be a vtable of backend function pointers, with `downcast_rs` providing
//! the one controlled escape hatch back to a concrete backend type.

use bitflags::bitflags;
use downcast_rs::{impl_downcast, Downcast};
use std::fmt::Debug;

/// Trait implemented by backend texture objects.
pub trait Texture: Downcast + Debug {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> Format;
}

/// Trait implemented by backend buffer objects.
pub trait Buffer: Downcast + Debug {
    fn size(&self) -> u64;
}

/// Trait implemented by backend compiled-pass objects (a draw call or compute dispatch bound to
/// one shader and one target configuration).
pub trait Pass: Downcast + Debug {}

/// Trait implemented by backend GPU timer query objects.
pub trait Timer: Downcast + Debug {}

impl_downcast!(Texture);
impl_downcast!(Buffer);
impl_downcast!(Pass);
impl_downcast!(Timer);

/// Pixel/texel format. Only the axes the planner and dispatch engine actually branch on are
/// modeled; a real backend maps these onto its native enumeration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Format {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    R16Unorm,
    Rg16Unorm,
    Rgba16Unorm,
    R16Float,
    Rgba16Float,
    R32Float,
    Rgba32Float,
    Rgb10A2Unorm,
}

impl Format {
    /// Bit depth of the format's first component. Used to infer `sample_depth` (§4.E phase 1).
    pub fn first_component_depth(&self) -> u32 {
        match self {
            Format::R8Unorm | Format::Rg8Unorm | Format::Rgba8Unorm => 8,
            Format::R16Unorm | Format::Rg16Unorm | Format::Rgba16Unorm => 16,
            Format::R16Float | Format::Rgba16Float => 16,
            Format::R32Float | Format::Rgba32Float => 32,
            Format::Rgb10A2Unorm => 10,
        }
    }

    /// Number of texel components (1..4).
    pub fn component_count(&self) -> u32 {
        match self {
            Format::R8Unorm | Format::R16Unorm | Format::R16Float | Format::R32Float => 1,
            Format::Rg8Unorm | Format::Rg16Unorm => 2,
            Format::Rgba8Unorm
            | Format::Rgba16Unorm
            | Format::Rgba16Float
            | Format::Rgba32Float
            | Format::Rgb10A2Unorm => 4,
        }
    }

    pub fn is_unorm(&self) -> bool {
        matches!(
            self,
            Format::R8Unorm
                | Format::Rg8Unorm
                | Format::Rgba8Unorm
                | Format::R16Unorm
                | Format::Rg16Unorm
                | Format::Rgba16Unorm
                | Format::Rgb10A2Unorm
        )
    }

    /// A format that can hold at least `components` channels at at least `min_depth` bits,
    /// chosen from the formats this crate knows about. Used by the plane-merge heuristic
    /// (§4.E phase 3) to find a format supporting two merged planes.
    pub fn smallest_supporting(components: u32, min_depth: u32, need_storage: bool) -> Option<Format> {
        const CANDIDATES: &[Format] = &[
            Format::R8Unorm,
            Format::Rg8Unorm,
            Format::Rgba8Unorm,
            Format::R16Unorm,
            Format::Rg16Unorm,
            Format::Rgba16Unorm,
            Format::R16Float,
            Format::Rgba16Float,
            Format::R32Float,
            Format::Rgba32Float,
        ];
        CANDIDATES
            .iter()
            .copied()
            .filter(|f| f.component_count() >= components && f.first_component_depth() >= min_depth)
            .filter(|f| !need_storage || f.supports_storage())
            .min_by_key(|f| (f.component_count(), f.first_component_depth()))
    }

    /// Whether this format can back a storage image (used for compute-shader-as-framebuffer
    /// promotion, §4.C).
    pub fn supports_storage(&self) -> bool {
        !matches!(self, Format::Rgb10A2Unorm)
    }
}

bitflags! {
    /// Per-format capability bits, queried by the planner and dispatch engine before committing
    /// to a code path (§6).
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct FormatCaps: u32 {
        const SAMPLEABLE      = 1 << 0;
        const RENDERABLE      = 1 << 1;
        const STORABLE        = 1 << 2;
        const BLITTABLE       = 1 << 3;
        const LINEAR_SAMPLING = 1 << 4;
        const BLENDABLE       = 1 << 5;
        const HOST_READABLE   = 1 << 6;
    }
}

bitflags! {
    /// Flags describing what a texture was created to support.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct TextureUsage: u32 {
        const SAMPLEABLE = 1 << 0;
        const RENDERABLE = 1 << 1;
        const STORABLE   = 1 << 2;
    }
}

/// Device-wide capabilities that gate optional code paths (§4.E degradation policy, §6).
#[derive(Copy, Clone, Debug)]
pub struct DeviceLimits {
    pub parallel_compute: bool,
    pub input_variables: bool,
    pub subgroups: bool,
    pub push_constant_size: u32,
    pub max_ubo_size: u32,
    pub glsl_version: u32,
    pub is_gles: bool,
    pub is_vulkan: bool,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        DeviceLimits {
            parallel_compute: true,
            input_variables: true,
            subgroups: false,
            push_constant_size: 128,
            max_ubo_size: 16 * 1024,
            glsl_version: 450,
            is_gles: false,
            is_vulkan: true,
        }
    }
}

/// The single external collaborator this crate depends on: a GPU backend.
///
/// This is the tagged-interface replacement for a vtable of backend function pointers (§9): a
/// capability trait with one method per primitive operation. A real implementation talks to
/// Vulkan/GL/whatever; the engine in this crate only calls through `&dyn Backend`.
pub trait Backend {
    fn limits(&self) -> DeviceLimits;
    fn format_caps(&self, format: Format) -> FormatCaps;

    fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: Format,
        usage: TextureUsage,
    ) -> Result<Box<dyn Texture>, BackendError>;
    fn destroy_texture(&self, texture: Box<dyn Texture>);
    fn upload_texture(&self, texture: &dyn Texture, data: &[u8]);
    fn clear_texture(&self, texture: &dyn Texture, color: [f32; 4]);

    fn create_buffer(&self, size: u64) -> Result<Box<dyn Buffer>, BackendError>;
    fn destroy_buffer(&self, buffer: Box<dyn Buffer>);
    fn write_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]);

    /// Compiles a raster or compute pass. `target_format` is `None` for a compute dispatch
    /// without a framebuffer (§4.C `compute`).
    fn create_pass(
        &self,
        source: &str,
        target_format: Option<Format>,
        is_compute: bool,
    ) -> Result<Box<dyn Pass>, BackendError>;
    fn destroy_pass(&self, pass: Box<dyn Pass>);
    fn run_pass(&self, pass: &dyn Pass, target: Option<&dyn Texture>);

    /// Extracts the backend's compiled program binary for an already-compiled pass, if the
    /// backend supports it (§3 "Cached program", §6 "Cache blob format"). `None` means this
    /// backend has no separable binary representation and the pass can only ever be rebuilt from
    /// source.
    fn program_binary(&self, pass: &dyn Pass) -> Option<Vec<u8>>;

    /// Creates a pass directly from a previously retrieved program binary, skipping source
    /// compilation entirely (§6: "re-attached to pass creation to skip recompilation").
    fn create_pass_from_binary(
        &self,
        binary: &[u8],
        target_format: Option<Format>,
        is_compute: bool,
    ) -> Result<Box<dyn Pass>, BackendError>;

    /// Uploads the full push-constant region for `pass` (§4.C "Variable upload": "copy into the
    /// pre-allocated push-constant region ... for push constants").
    fn upload_push_constants(&self, pass: &dyn Pass, bytes: &[u8]);

    /// Updates a single global (loose) uniform variable by its declared index. Unlike a global
    /// baked as a compile-time constant, this does not require recompiling the pass (§4.C
    /// "Variable upload": "for globals, enqueue a 'variable update' record").
    fn update_global_uniform(&self, pass: &dyn Pass, index: usize, bytes: &[u8]);

    fn create_timer(&self) -> Box<dyn Timer>;
    fn destroy_timer(&self, timer: Box<dyn Timer>);

    fn flush(&self);
    fn finish(&self);
    fn is_failed(&self) -> bool;
}

/// Failure of a single backend allocation/compile call (§7 "Backend allocation failure" /
/// "Shader compilation failure").
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("out of device memory")]
    OutOfMemory,
    #[error("shader compilation failed: {0}")]
    CompileFailed(String),
    #[error("device lost")]
    DeviceLost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_supporting_picks_narrowest_match() {
        assert_eq!(
            Format::smallest_supporting(2, 8, false),
            Some(Format::Rg8Unorm)
        );
        assert_eq!(
            Format::smallest_supporting(4, 16, false),
            Some(Format::Rgba16Unorm)
        );
        assert_eq!(Format::smallest_supporting(4, 40, false), None);
    }

    #[test]
    fn first_component_depth_matches_format() {
        assert_eq!(Format::R8Unorm.first_component_depth(), 8);
        assert_eq!(Format::Rgba16Float.first_component_depth(), 16);
        assert_eq!(Format::R32Float.first_component_depth(), 32);
    }
}
