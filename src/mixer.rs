//! Frame mixer (§3, §4.G): blends a time-indexed bundle of cached frames into one output frame,
//! weighting each input by a mixer kernel or by its visible fraction of the vsync interval
//! ("oversample" mode, GLOSSARY).

use crate::cache::{CachedFrame, FrameCache};
use crate::dispatch::Dispatch;
use crate::error::Result;
use crate::frame_model::{ColorSpace, Frame};
use crate::gpu::Backend;
use log::warn;
use ordered_float::OrderedFloat;

/// Weights below this magnitude are dropped once GC marking has already happened, so a
/// momentarily-negligible input still keeps its cache entry alive for the next call (§4.G
/// "Weight computation").
const NEGLIGIBLE_WEIGHT: f32 = 1e-3;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MixerKernel {
    /// No filtering: weight by the fraction of the vsync interval each input is visible for.
    Oversample,
    Triangle { radius: f32 },
    Box { radius: f32 },
}

impl MixerKernel {
    fn radius(&self) -> Option<f32> {
        match self {
            MixerKernel::Oversample => None,
            MixerKernel::Triangle { radius } | MixerKernel::Box { radius } => Some(*radius),
        }
    }

    fn filter_sample(&self, t: f32) -> f32 {
        match self {
            MixerKernel::Oversample => 0.0, // unreachable: oversample has its own weight path
            MixerKernel::Triangle { radius } => {
                if t.abs() < *radius {
                    1.0 - t.abs() / radius
                } else {
                    0.0
                }
            }
            MixerKernel::Box { radius } => {
                if t.abs() < *radius {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// One input to a mixer call: a cached-frame signature and its presentation time relative to the
/// "current" output moment (negative = past, positive = future), monotonically non-decreasing
/// across the input list (§4.G contract).
#[derive(Copy, Clone, Debug)]
pub struct MixerInput {
    pub signature: u64,
    pub presentation_time: f32,
}

/// Caller-assembled mixer configuration (§1.1 "Configuration"): plain, `Clone + Hash`-able.
#[derive(Copy, Clone, Debug)]
pub struct MixerParams {
    pub kernel: MixerKernel,
    pub vsync_duration: f32,
    pub preserve_mixing_cache: bool,
}

impl MixerParams {
    /// Deterministic 64-bit hash of the mixer configuration (§4.F "Params hash"): kernel variant
    /// and numeric fields are hashed by value via `ordered_float::OrderedFloat` so two identical
    /// configurations always hash identically regardless of construction order.
    pub fn params_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = fxhash::FxHasher::default();
        match self.kernel {
            MixerKernel::Oversample => 0u8.hash(&mut hasher),
            MixerKernel::Triangle { radius } => {
                1u8.hash(&mut hasher);
                OrderedFloat(radius).hash(&mut hasher);
            }
            MixerKernel::Box { radius } => {
                2u8.hash(&mut hasher);
                OrderedFloat(radius).hash(&mut hasher);
            }
        }
        OrderedFloat(self.vsync_duration).hash(&mut hasher);
        self.preserve_mixing_cache.hash(&mut hasher);
        hasher.finish()
    }
}

/// A weighted input surviving the negligible-weight cutoff, ready for composition.
pub struct WeightedInput {
    pub signature: u64,
    pub weight: f32,
}

/// Computes per-input weights (§4.G "Weight computation"). Does not normalize; composition
/// divides by the sum of surviving weights.
pub fn compute_weights(inputs: &[MixerInput], params: &MixerParams) -> Vec<f32> {
    match params.kernel {
        MixerKernel::Oversample => {
            let n = inputs.len();
            (0..n)
                .map(|i| {
                    let t0 = inputs[i].presentation_time;
                    let t1 = if i + 1 < n {
                        inputs[i + 1].presentation_time
                    } else {
                        f32::INFINITY
                    };
                    let lo = t0.max(0.0);
                    let hi = t1.min(params.vsync_duration);
                    let len = (hi - lo).max(0.0);
                    len / params.vsync_duration
                })
                .collect()
        }
        kernel => inputs
            .iter()
            .map(|inp| kernel.filter_sample(inp.presentation_time))
            .collect(),
    }
}

/// Runs one mixer pass: marks the frame cache, resolves each input against it (repopulating
/// misses via `populate`), computes weights, drops negligible inputs, sweeps the cache, and
/// returns the surviving weighted inputs ready for composition (§4.F, §4.G).
///
/// `populate` is called for any input signature missing from the cache or not reusable under the
/// current output size/params; it must render the input frame into a fresh cache texture and
/// return the populated [`CachedFrame`]. On any populate failure the mixing-disabled latch is
/// returned as `Err` so the caller can fall back to the single-image renderer (§4.G "Fallback").
pub fn run_mix<F>(
    cache: &mut FrameCache,
    backend: &dyn Backend,
    _dispatch: &mut Dispatch,
    inputs: &[MixerInput],
    params: &MixerParams,
    out_w: u32,
    out_h: u32,
    mut populate: F,
) -> Result<Vec<WeightedInput>>
where
    F: FnMut(u64) -> Result<CachedFrame>,
{
    let params_hash = params.params_hash();
    cache.mark_all();

    for input in inputs {
        if let Some(entry) = cache.get(input.signature) {
            if entry.reusable(out_w, out_h, params_hash, params.preserve_mixing_cache) {
                cache.unmark(input.signature);
                continue;
            }
        }
        match populate(input.signature) {
            Ok(frame) => {
                cache.insert(frame);
                cache.unmark(input.signature);
            }
            Err(e) => {
                warn!("mixer populate failed for signature {:#x}: {}", input.signature, e);
                return Err(e);
            }
        }
    }

    let weights = compute_weights(inputs, params);
    cache.sweep(backend);

    Ok(inputs
        .iter()
        .zip(weights)
        .filter(|(_, w)| w.abs() > NEGLIGIBLE_WEIGHT)
        .map(|(inp, w)| WeightedInput {
            signature: inp.signature,
            weight: w,
        })
        .collect())
}

/// Mixed output color space (§4.G "Composition"): the current frame's color space, RGB, full
/// range, premultiplied alpha.
pub fn mix_color_space(current: ColorSpace) -> ColorSpace {
    current
}

pub fn normalize_weights(weighted: &[WeightedInput]) -> Vec<f32> {
    let sum: f32 = weighted.iter().map(|w| w.weight).sum();
    if sum <= 0.0 {
        return vec![0.0; weighted.len()];
    }
    weighted.iter().map(|w| w.weight / sum).collect()
}

/// Degradation latch for mixing failures (§4.E "Degradation policy"): once tripped, subsequent
/// calls skip mixing and recursively render only the "current" frame.
#[derive(Default)]
pub struct MixingLatch {
    disabled: bool,
}

impl MixingLatch {
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn trip(&mut self) {
        if !self.disabled {
            warn!("mixing disabled after failure, falling back to single-frame render");
        }
        self.disabled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversample_weights_sum_to_one_when_inputs_cover_interval() {
        let params = MixerParams {
            kernel: MixerKernel::Oversample,
            vsync_duration: 1.0,
            preserve_mixing_cache: false,
        };
        let inputs = vec![
            MixerInput { signature: 1, presentation_time: 0.0 },
            MixerInput { signature: 2, presentation_time: 0.5 },
        ];
        let weights = compute_weights(&inputs, &params);
        let sum: f32 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn triangle_kernel_drops_far_inputs() {
        let params = MixerParams {
            kernel: MixerKernel::Triangle { radius: 1.0 },
            vsync_duration: 1.0,
            preserve_mixing_cache: false,
        };
        let inputs = vec![
            MixerInput { signature: 1, presentation_time: 0.0 },
            MixerInput { signature: 2, presentation_time: 5.0 },
        ];
        let weights = compute_weights(&inputs, &params);
        assert!(weights[0] > 0.0);
        assert_eq!(weights[1], 0.0);
    }

    #[test]
    fn params_hash_is_deterministic() {
        let a = MixerParams {
            kernel: MixerKernel::Triangle { radius: 2.0 },
            vsync_duration: 1.0 / 60.0,
            preserve_mixing_cache: false,
        };
        let b = a;
        assert_eq!(a.params_hash(), b.params_hash());
    }

    #[test]
    fn negligible_weight_normalization_is_safe() {
        let weighted = vec![WeightedInput { signature: 1, weight: 0.0 }];
        let normalized = normalize_weights(&weighted);
        assert_eq!(normalized, vec![0.0]);
    }
}
