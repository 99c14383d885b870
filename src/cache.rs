//! Frame cache (§3 "Cached frame", §4.F): per-signature cached intermediate RGB textures used by
//! the mixer for temporal blending, reclaimed by mark-and-sweep exactly like
//! `src/renderer/backend/gl/cache.rs`'s `ResourceCache` reclaims scoped entries — everything
//! is marked for eviction up front, a scan un-marks what's still referenced, and whatever is left
//! marked at the end is freed.

use crate::frame_model::ColorSpace;
use crate::gpu::{Backend, Texture};
use log::debug;
use std::collections::HashMap;
use std::rc::Rc;

pub struct CachedFrame {
    pub signature: u64,
    pub params_hash: u64,
    pub color_space: ColorSpace,
    pub icc_profile: Option<Rc<[u8]>>,
    pub texture: Rc<dyn Texture>,
    marked_for_eviction: bool,
}

pub struct FrameCache {
    entries: HashMap<u64, CachedFrame>,
}

impl FrameCache {
    pub fn new() -> Self {
        FrameCache { entries: HashMap::new() }
    }

    pub fn get(&self, signature: u64) -> Option<&CachedFrame> {
        self.entries.get(&signature)
    }

    pub fn insert(&mut self, frame: CachedFrame) {
        self.entries.insert(frame.signature, frame);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Marks every cached entry for eviction (§4.F "Cache management", first step of a mixer
    /// pass).
    pub fn mark_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.marked_for_eviction = true;
        }
    }

    /// Clears the eviction mark on `signature` if present, meaning "this frame is still wanted";
    /// returns whether it was found.
    pub fn unmark(&mut self, signature: u64) -> bool {
        if let Some(entry) = self.entries.get_mut(&signature) {
            entry.marked_for_eviction = false;
            true
        } else {
            false
        }
    }

    /// Frees every still-marked entry via `backend`, returning its texture to `pool` would be
    /// the caller's job in a full pipeline; here we simply drop the `Rc<dyn Texture>` (the pool
    /// keeps its own handle table and reclaims by reference count).
    pub fn sweep(&mut self, backend: &dyn Backend) {
        let stale: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.marked_for_eviction)
            .map(|(&sig, _)| sig)
            .collect();
        for sig in &stale {
            self.entries.remove(sig);
        }
        if !stale.is_empty() {
            debug!("frame cache evicted {} entries", stale.len());
        }
        let _ = backend;
    }
}

impl CachedFrame {
    pub fn new(
        signature: u64,
        params_hash: u64,
        color_space: ColorSpace,
        icc_profile: Option<Rc<[u8]>>,
        texture: Rc<dyn Texture>,
    ) -> Self {
        CachedFrame {
            signature,
            params_hash,
            color_space,
            icc_profile,
            texture,
            marked_for_eviction: false,
        }
    }

    /// Reuse check (§4.F "Reuse check"): a cached texture is reused verbatim if
    /// `preserve_mixing_cache` is set by the caller, or if both the output dimensions and the
    /// parameter hash match. Per the recorded open-question decision in DESIGN.md,
    /// `preserve_mixing_cache` overrides the hash check unconditionally — callers opting into it
    /// accept stale output if parameters changed mid-playback.
    pub fn reusable(
        &self,
        out_w: u32,
        out_h: u32,
        current_params_hash: u64,
        preserve_mixing_cache: bool,
    ) -> bool {
        if preserve_mixing_cache {
            return true;
        }
        self.texture.width() == out_w
            && self.texture.height() == out_h
            && self.params_hash == current_params_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_model::{Primaries, TransferFunction};
    use crate::testutil::MockBackend;

    fn color_space() -> ColorSpace {
        ColorSpace {
            primaries: Primaries::Bt709,
            transfer: TransferFunction::Srgb,
            peak: 100.0,
            sig_scale: 1.0,
        }
    }

    fn texture(w: u32, h: u32) -> Rc<dyn Texture> {
        #[derive(Debug)]
        struct T(u32, u32);
        impl Texture for T {
            fn width(&self) -> u32 {
                self.0
            }
            fn height(&self) -> u32 {
                self.1
            }
            fn format(&self) -> crate::gpu::Format {
                crate::gpu::Format::Rgba8Unorm
            }
        }
        Rc::new(T(w, h))
    }

    #[test]
    fn mark_and_sweep_evicts_unreferenced_entries() {
        let backend = MockBackend::new();
        let mut cache = FrameCache::new();
        cache.insert(CachedFrame::new(1, 0, color_space(), None, texture(4, 4)));
        cache.insert(CachedFrame::new(2, 0, color_space(), None, texture(4, 4)));

        cache.mark_all();
        cache.unmark(1);
        cache.sweep(&backend);

        assert_eq!(cache.len(), 1);
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
    }

    #[test]
    fn reusable_respects_preserve_mixing_cache_override() {
        let entry = CachedFrame::new(1, 42, color_space(), None, texture(16, 16));
        assert!(!entry.reusable(16, 16, 43, false));
        assert!(entry.reusable(16, 16, 43, true));
        assert!(entry.reusable(16, 16, 42, false));
    }
}
