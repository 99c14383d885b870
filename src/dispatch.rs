//! The dispatch engine (component C, §4.C): turns a [`ShaderBuilder`] into a compiled, cached
//! GPU pass and runs it.
//!
//! The compiled-pass cache is a `slotmap`-keyed table exactly like
//! `src/renderer/backend/gl/cache.rs`'s `ResourceCache`: a cache key maps to a slot holding the
//! compiled pass plus bookkeeping (`last_used_frame`), and a sweep evicts the coldest entries
//! once the cache outgrows a high-water mark that doubles on overflow rather than fighting
//! constant eviction churn at a fixed size.

use crate::codegen::generate;
use crate::error::{Error, Result};
use crate::gpu::{Backend, Buffer, Format, Pass};
use crate::placement::{place_variables, Placement, VariablePlacement};
use crate::shader_builder::ShaderBuilder;
use log::{debug, warn};
use slotmap::{new_key_type, SlotMap};
use std::collections::HashMap;

new_key_type! { pub struct PassKey; }

/// Blend mode a compiled pass was built against. Part of the cache key (§4.C "Pass lookup"):
/// the same shader signature run against two different blend modes needs two distinct passes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Blend {
    None,
    AlphaOver,
}

/// Identifies one compiled pass uniquely. Two dispatches with identical shader content but
/// different target format, blend mode, or vertex layout must never share a compiled pass (§4.C
/// "Pass lookup", "Cache soundness" invariant).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct PassCacheKey {
    signature: u64,
    target_format: Option<Format>,
    blend: Option<Blend>,
    vertex_stride: Option<u32>,
}

struct CompiledPass {
    pass: Box<dyn Pass>,
    placement: Placement,
    uniform_buffer: Option<Box<dyn Buffer>>,
    /// Scratch buffer mirroring the push-constant region, memcpy'd into on a changed push
    /// variable and uploaded in one call per dispatch (§4.C "Variable upload").
    push_scratch: Vec<u8>,
    /// Bytes last uploaded for each variable slot, so repeat dispatches with unchanged values
    /// skip the upload entirely (§4.C "Variable upload").
    last_bytes: Vec<Option<Vec<u8>>>,
    last_used_frame: u64,
}

/// Initial cache capacity before the first doubling (§4.C "Cache eviction").
const INITIAL_HIGH_WATER_MARK: usize = 64;

pub struct Dispatch<'b> {
    backend: &'b dyn Backend,
    cache: SlotMap<PassKey, CompiledPass>,
    by_key: HashMap<PassCacheKey, PassKey>,
    /// Persisted backend program binaries keyed by shader signature, populated by
    /// [`Dispatch::load`] and consulted by [`Dispatch::run`] to skip shader source compilation
    /// even on a fresh process where the pass cache above is empty (§6 "Cache blob format").
    program_cache: HashMap<u64, Vec<u8>>,
    frame: u64,
    high_water_mark: usize,
    current: Option<ShaderBuilder>,
}

impl<'b> Dispatch<'b> {
    pub fn new(backend: &'b dyn Backend) -> Self {
        Dispatch {
            backend,
            cache: SlotMap::with_key(),
            by_key: HashMap::new(),
            program_cache: HashMap::new(),
            frame: 0,
            high_water_mark: INITIAL_HIGH_WATER_MARK,
            current: None,
        }
    }

    /// Starts a new shader under construction (§4.C `begin`). Panics if a shader is already in
    /// progress and not yet finished or aborted, same contract as the teacher's arena borrow:
    /// callers are expected to pair `begin` with exactly one of `finish`/`compute`/`vertex`/
    /// `abort`.
    pub fn begin(&mut self, is_compute: bool) -> &mut ShaderBuilder {
        assert!(self.current.is_none(), "begin() called while a shader is already in progress");
        self.current = Some(ShaderBuilder::new(is_compute));
        self.current.as_mut().unwrap()
    }

    /// Discards the shader under construction without compiling or running it.
    pub fn abort(&mut self) {
        self.current = None;
    }

    /// Compiles (if needed) and runs the in-progress shader as a fragment pass targeting
    /// `target_format` with the given blend mode, then uploads variable data and dispatches the
    /// draw (§4.C `finish`).
    pub fn finish(&mut self, target_format: Format, blend: Blend) -> Result<()> {
        let builder = self.current.take().expect("finish() called with no shader in progress");
        self.run(&builder, Some(target_format), Some(blend), None)
    }

    /// Compiles (if needed) and runs the in-progress shader as a compute dispatch with no bound
    /// framebuffer (§4.C `compute`).
    pub fn compute(&mut self) -> Result<()> {
        let builder = self.current.take().expect("compute() called with no shader in progress");
        self.run(&builder, None, None, None)
    }

    /// Compiles (if needed) and runs the in-progress shader as a vertex/fragment pair, with the
    /// vertex stride participating in the cache key since two vertex layouts can't share a
    /// compiled pass even with identical source (§4.C `vertex`).
    pub fn vertex(&mut self, target_format: Format, blend: Blend, vertex_stride: u32) -> Result<()> {
        let builder = self.current.take().expect("vertex() called with no shader in progress");
        self.run(&builder, Some(target_format), Some(blend), Some(vertex_stride))
    }

    /// Compiles (if needed) and runs an already-built shader directly, bypassing the
    /// `begin`/`current` single-slot mechanism. Used by callers (such as the render planner and
    /// `Img::materialize`) that hold their own [`ShaderBuilder`] across multiple accumulation
    /// steps rather than building it inline between `begin` and `finish`.
    pub fn dispatch_builder(&mut self, builder: &ShaderBuilder, target_format: Format, blend: Blend) -> Result<()> {
        self.run(builder, Some(target_format), Some(blend), None)
    }

    fn run(
        &mut self,
        builder: &ShaderBuilder,
        target_format: Option<Format>,
        blend: Option<Blend>,
        vertex_stride: Option<u32>,
    ) -> Result<()> {
        let signature = builder.signature();
        self.frame += 1;
        let cache_key = PassCacheKey {
            signature,
            target_format,
            blend,
            vertex_stride,
        };

        if let Some(&key) = self.by_key.get(&cache_key) {
            self.upload_and_run(key, builder);
            return Ok(());
        }

        let limits = self.backend.limits();
        let placement = place_variables(builder.variables(), &limits)?;
        let is_compute_pass = builder.is_compute() || target_format.is_none();

        let pass = if let Some(binary) = self.program_cache.get(&signature) {
            self.backend
                .create_pass_from_binary(binary, target_format, is_compute_pass)
                .map_err(Error::Backend)?
        } else {
            let generated = generate(builder, &placement, &limits);
            let pass = self
                .backend
                .create_pass(&generated.glsl, target_format, is_compute_pass)
                .map_err(Error::Backend)?;
            if let Some(binary) = self.backend.program_binary(pass.as_ref()) {
                self.program_cache.insert(signature, binary);
            }
            pass
        };

        let uniform_buffer = if placement.uniform_buffer_size > 0 {
            Some(
                self.backend
                    .create_buffer(placement.uniform_buffer_size as u64)
                    .map_err(Error::Backend)?,
            )
        } else {
            None
        };
        let push_scratch = vec![0u8; placement.push_constant_size as usize];

        let entry = CompiledPass {
            pass,
            placement,
            uniform_buffer,
            push_scratch,
            last_bytes: vec![None; builder.variables().len()],
            last_used_frame: self.frame,
        };
        let key = self.cache.insert(entry);
        self.by_key.insert(cache_key, key);
        self.evict_if_needed();

        self.upload_and_run(key, builder);
        Ok(())
    }

    /// Uploads only the variable bytes that changed since this pass's last dispatch, then runs
    /// it (§4.C "Variable upload"). Push-constant writes are batched into one scratch buffer and
    /// one backend call per dispatch; uniform-buffer and global-uniform writes go straight to
    /// the backend at their placed offset/index.
    fn upload_and_run(&mut self, key: PassKey, builder: &ShaderBuilder) {
        let backend = self.backend;
        let entry = self.cache.get_mut(key).expect("cache key must be valid");
        entry.last_used_frame = self.frame;

        let mut push_dirty = false;
        for (i, slot) in entry.placement.slots.iter().enumerate() {
            let var = &builder.variables()[i];
            if entry.last_bytes[i].as_deref() == Some(var.bytes.as_slice()) {
                continue;
            }
            match *slot {
                VariablePlacement::PushConstant { offset, size } => {
                    let start = offset as usize;
                    entry.push_scratch[start..start + size as usize].copy_from_slice(&var.bytes);
                    push_dirty = true;
                }
                VariablePlacement::UniformBuffer { offset, .. } => {
                    if let Some(buf) = &entry.uniform_buffer {
                        backend.write_buffer(buf.as_ref(), offset as u64, &var.bytes);
                    }
                }
                VariablePlacement::GlobalUniform { index } => {
                    backend.update_global_uniform(entry.pass.as_ref(), index, &var.bytes);
                }
                VariablePlacement::Unplaced => {}
            }
            entry.last_bytes[i] = Some(var.bytes.clone());
        }

        if push_dirty {
            backend.upload_push_constants(entry.pass.as_ref(), &entry.push_scratch);
        }

        backend.run_pass(entry.pass.as_ref(), None);
        debug!("ran cached pass (frame {})", self.frame);
    }

    fn evict_if_needed(&mut self) {
        if self.cache.len() <= self.high_water_mark {
            return;
        }
        let target = self.high_water_mark / 2;
        let mut by_age: Vec<(PassKey, u64)> = self.cache.iter().map(|(k, v)| (k, v.last_used_frame)).collect();
        by_age.sort_by_key(|&(_, frame)| frame);
        let evict_count = self.cache.len().saturating_sub(target);
        for (key, _) in by_age.into_iter().take(evict_count) {
            if let Some(entry) = self.cache.remove(key) {
                self.backend.destroy_pass(entry.pass);
            }
            self.by_key.retain(|_, v| *v != key);
        }
        self.high_water_mark *= 2;
        warn!(
            "compiled-pass cache exceeded high-water mark, evicted {} entries, new mark {}",
            evict_count, self.high_water_mark
        );
    }

    /// Resets per-frame bookkeeping (§4.C `reset_frame`); the compiled-pass cache itself
    /// persists across frames, only the frame counter advances so age-based eviction can
    /// distinguish "used this frame" from "stale".
    pub fn reset_frame(&mut self) {
        self.frame += 1;
    }

    /// Serializes the compiled program-binary cache to the on-disk blob format (§6 "Cache blob
    /// format"): `b"PLDP"`, a little-endian `uint32` version, a little-endian `uint32` entry
    /// count, then per entry a signature (`uint64` LE), a length (`uint64` LE) and that many
    /// bytes of opaque backend program binary.
    pub fn save(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"PLDP");
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(self.program_cache.len() as u32).to_le_bytes());
        for (sig, binary) in &self.program_cache {
            out.extend_from_slice(&sig.to_le_bytes());
            out.extend_from_slice(&(binary.len() as u64).to_le_bytes());
            out.extend_from_slice(binary);
        }
        out
    }

    /// Loads a blob previously produced by [`Dispatch::save`], merging its entries into the
    /// in-memory program-binary cache so subsequent `finish`/`compute`/`vertex` calls can call
    /// `create_pass_from_binary` instead of recompiling from source for any signature it
    /// contains (§6). Duplicate signatures prefer the already-present (already-compiled) entry.
    /// Malformed or unrecognized-version blobs are rejected with [`Error::Validation`] rather
    /// than partially applied.
    pub fn load(&mut self, blob: &[u8]) -> Result<()> {
        if blob.len() < 12 || &blob[0..4] != b"PLDP" {
            return Err(Error::Validation("cache blob missing PLDP magic"));
        }
        let version = u32::from_le_bytes(blob[4..8].try_into().unwrap());
        if version != 1 {
            return Err(Error::Validation("cache blob has unsupported version"));
        }
        let count = u32::from_le_bytes(blob[8..12].try_into().unwrap()) as usize;
        let mut cursor = 12usize;
        let mut parsed = Vec::with_capacity(count);
        for _ in 0..count {
            if cursor + 16 > blob.len() {
                return Err(Error::Validation("cache blob truncated in entry header"));
            }
            let sig = u64::from_le_bytes(blob[cursor..cursor + 8].try_into().unwrap());
            let len = u64::from_le_bytes(blob[cursor + 8..cursor + 16].try_into().unwrap()) as usize;
            cursor += 16;
            if cursor + len > blob.len() {
                return Err(Error::Validation("cache blob truncated in entry body"));
            }
            let binary = blob[cursor..cursor + len].to_vec();
            cursor += len;
            parsed.push((sig, binary));
        }
        for (sig, binary) in parsed {
            self.program_cache.entry(sig).or_insert(binary);
        }
        Ok(())
    }

    pub fn compiled_pass_count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockBackend;
    use crate::typedesc::TypeDesc;

    #[test]
    fn begin_finish_compiles_and_caches_one_pass() {
        let backend = MockBackend::new();
        let mut d = Dispatch::new(&backend);
        d.begin(false).push_body("void main() {}");
        d.finish(Format::Rgba8Unorm, Blend::None).unwrap();
        assert_eq!(d.compiled_pass_count(), 1);
    }

    #[test]
    fn identical_shader_reuses_cached_pass() {
        let backend = MockBackend::new();
        let mut d = Dispatch::new(&backend);
        d.begin(false).push_body("void main() {}");
        d.finish(Format::Rgba8Unorm, Blend::None).unwrap();
        d.begin(false).push_body("void main() {}");
        d.finish(Format::Rgba8Unorm, Blend::None).unwrap();
        assert_eq!(d.compiled_pass_count(), 1);
    }

    #[test]
    fn different_target_format_gets_its_own_compiled_pass() {
        // Cache soundness: identical shader content dispatched against two different target
        // formats must never share a compiled pass (§4.C "Pass lookup").
        let backend = MockBackend::new();
        let mut d = Dispatch::new(&backend);
        d.begin(false).push_body("void main() {}");
        d.finish(Format::Rgba8Unorm, Blend::None).unwrap();
        d.begin(false).push_body("void main() {}");
        d.finish(Format::Rgba16Float, Blend::None).unwrap();
        assert_eq!(d.compiled_pass_count(), 2);
    }

    #[test]
    fn different_blend_mode_gets_its_own_compiled_pass() {
        let backend = MockBackend::new();
        let mut d = Dispatch::new(&backend);
        d.begin(false).push_body("void main() {}");
        d.finish(Format::Rgba8Unorm, Blend::None).unwrap();
        d.begin(false).push_body("void main() {}");
        d.finish(Format::Rgba8Unorm, Blend::AlphaOver).unwrap();
        assert_eq!(d.compiled_pass_count(), 2);
    }

    #[test]
    fn abort_does_not_compile_anything() {
        let backend = MockBackend::new();
        let mut d = Dispatch::new(&backend);
        d.begin(false).push_body("void main() {}");
        d.abort();
        assert_eq!(d.compiled_pass_count(), 0);
    }

    #[test]
    fn load_then_dispatch_skips_backend_compilation() {
        let backend = MockBackend::new();
        let mut d = Dispatch::new(&backend);
        d.begin(false).push_variable("x", TypeDesc::FLOAT, true);
        d.current_for_test().push_body("void main() {}");
        d.finish(Format::Rgba8Unorm, Blend::None).unwrap();
        let blob = d.save();

        let backend2 = MockBackend::new();
        let mut d2 = Dispatch::new(&backend2);
        d2.load(&blob).unwrap();
        d2.begin(false).push_variable("x", TypeDesc::FLOAT, true);
        d2.current_for_test().push_body("void main() {}");
        d2.finish(Format::Rgba8Unorm, Blend::None).unwrap();

        assert_eq!(backend2.compiled_pass_count(), 0);
        assert_eq!(backend2.create_pass_from_binary_count(), 1);
    }

    #[test]
    fn load_rejects_bad_magic() {
        let backend = MockBackend::new();
        let mut d = Dispatch::new(&backend);
        assert!(d.load(b"xxxx").is_err());
    }

    #[test]
    fn unchanged_variable_bytes_skip_upload() {
        let backend = MockBackend::new();
        let mut d = Dispatch::new(&backend);
        let b = d.begin(false);
        let idx = b.push_variable("strength", TypeDesc::FLOAT, true);
        b.set_variable_bytes(idx, vec![1, 2, 3, 4]);
        b.push_body("void main() {}");
        d.finish(Format::Rgba8Unorm, Blend::None).unwrap();
        assert_eq!(backend.push_constant_upload_count(), 1);

        let b = d.begin(false);
        let idx2 = b.push_variable("strength", TypeDesc::FLOAT, true);
        b.set_variable_bytes(idx2, vec![1, 2, 3, 4]);
        b.push_body("void main() {}");
        d.finish(Format::Rgba8Unorm, Blend::None).unwrap();
        assert_eq!(backend.push_constant_upload_count(), 1, "unchanged bytes must not re-upload");

        let b = d.begin(false);
        let idx3 = b.push_variable("strength", TypeDesc::FLOAT, true);
        b.set_variable_bytes(idx3, vec![9, 9, 9, 9]);
        b.push_body("void main() {}");
        d.finish(Format::Rgba8Unorm, Blend::None).unwrap();
        assert_eq!(backend.push_constant_upload_count(), 2, "changed bytes must re-upload");
    }

    impl<'b> Dispatch<'b> {
        fn current_for_test(&mut self) -> &mut ShaderBuilder {
            self.current.as_mut().unwrap()
        }
    }
}
