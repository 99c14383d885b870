//! Intermediate texture pool (§3 "Pool texture", §4.D), directly grounded on
//! `src/renderer/backend/gl/pool.rs`'s `Pool<D, K, T>`: scan live entries for one that's a
//! close-enough fit and not in conflicting use, otherwise allocate fresh. Selection is by argmin
//! distance rather than first-fit, since reusing a texture that's merely "close" in size still
//! saves an allocation and the planner always rewrites to the exact requested viewport region. A
//! reused entry that doesn't already match the request exactly is destroyed and recreated in
//! place at the exact requested size/format.

use crate::gpu::{Backend, Format, Texture, TextureUsage};
use log::debug;
use slotmap::{new_key_type, SlotMap};

new_key_type! { pub struct PoolKey; }

struct PoolEntry {
    texture: Box<dyn Texture>,
    width: u32,
    height: u32,
    format: Format,
    in_use: bool,
    last_used_frame: u64,
}

/// Distance between a pool entry and a request: width/height deltas plus a flat penalty when the
/// entry's format doesn't match (§4.D). Smaller is better; `None` means disqualified outright
/// (in use). An entry smaller than the request is not disqualified — it's simply a worse (larger
/// distance) candidate, and will be resized up on reuse.
fn distance(entry: &PoolEntry, width: u32, height: u32, format: Format) -> Option<u32> {
    if entry.in_use {
        return None;
    }
    const FORMAT_MISMATCH_PENALTY: u32 = 1000;
    let w_delta = entry.width.abs_diff(width);
    let h_delta = entry.height.abs_diff(height);
    let penalty = if entry.format != format { FORMAT_MISMATCH_PENALTY } else { 0 };
    Some(w_delta + h_delta + penalty)
}

pub struct TexturePool {
    entries: SlotMap<PoolKey, PoolEntry>,
    frame: u64,
}

impl TexturePool {
    pub fn new() -> Self {
        TexturePool {
            entries: SlotMap::with_key(),
            frame: 0,
        }
    }

    pub fn begin_frame(&mut self) {
        self.frame += 1;
    }

    /// Returns the closest-fitting free texture for `width`x`height`/`format`, or allocates a new
    /// one through `backend` if none qualifies (§4.D).
    pub fn acquire(
        &mut self,
        backend: &dyn Backend,
        width: u32,
        height: u32,
        format: Format,
        usage: TextureUsage,
    ) -> crate::error::Result<PoolKey> {
        let best = self
            .entries
            .iter()
            .filter_map(|(k, e)| distance(e, width, height, format).map(|d| (k, d)))
            .min_by_key(|&(_, d)| d);

        if let Some((key, _)) = best {
            let needs_resize = {
                let entry = &self.entries[key];
                entry.width != width || entry.height != height || entry.format != format
            };
            if needs_resize {
                let new_texture = backend
                    .create_texture(width, height, format, usage)
                    .map_err(crate::error::Error::Backend)?;
                let entry = self.entries.get_mut(key).unwrap();
                let old_texture = std::mem::replace(&mut entry.texture, new_texture);
                backend.destroy_texture(old_texture);
                debug!(
                    "pool resized entry from {}x{} {:?} to {}x{} {:?}",
                    entry.width, entry.height, entry.format, width, height, format
                );
                entry.width = width;
                entry.height = height;
                entry.format = format;
            }
            let entry = self.entries.get_mut(key).unwrap();
            entry.in_use = true;
            entry.last_used_frame = self.frame;
            debug!("pool reuse for request {}x{} {:?}", width, height, format);
            return Ok(key);
        }

        let texture = backend
            .create_texture(width, height, format, usage)
            .map_err(crate::error::Error::Backend)?;
        let key = self.entries.insert(PoolEntry {
            texture,
            width,
            height,
            format,
            in_use: true,
            last_used_frame: self.frame,
        });
        debug!("pool allocated new {}x{} {:?}", width, height, format);
        Ok(key)
    }

    /// Returns a texture to the pool for future reuse without destroying it.
    pub fn release(&mut self, key: PoolKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.in_use = false;
        }
    }

    pub fn texture(&self, key: PoolKey) -> &dyn Texture {
        self.entries[key].texture.as_ref()
    }

    /// Destroys every entry not used within the last `max_age` frames, freeing it via `backend`
    /// (§4.D pool shrink policy).
    pub fn sweep(&mut self, backend: &dyn Backend, max_age: u64) {
        let stale: Vec<PoolKey> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.in_use && self.frame.saturating_sub(e.last_used_frame) > max_age)
            .map(|(k, _)| k)
            .collect();
        for key in stale {
            if let Some(entry) = self.entries.remove(key) {
                backend.destroy_texture(entry.texture);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
