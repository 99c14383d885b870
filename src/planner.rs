//! The render planner (component E, §4.E): orchestrates plane read → merge → hook → scale →
//! color-map → write. The individual image-processing algorithms (scaler kernels, color math,
//! dither, ICC, debanding, AV1 film grain) are out of scope (§1 Non-goals) and modeled as the
//! [`Hook`] trait and the free functions below only decide *whether* and *where* to invoke them;
//! the teacher-grounded piece is the orchestration and the degradation-latch bookkeeping, which
//! follows `pipeline/validate.rs`'s "log once at WARN, then degrade silently" pattern.

use crate::frame_model::{ColorRepr, ColorSpace, Frame, Img, ImgState, PlaneType, Rect};
use crate::gpu::Format;
use crate::shader_builder::ShaderBuilder;
use log::warn;

/// One boolean "disabled" latch per optional capability (§4.E "Degradation policy"). Once a
/// capability fails, the latch trips, a warning logs exactly once, and every later call silently
/// skips that capability for the planner's remaining lifetime.
#[derive(Default)]
pub struct DegradationLatches {
    compute: bool,
    storable_intermediates: bool,
    linear_hdr: bool,
    debanding: bool,
    hooks: bool,
    scaler_complexity: bool,
    overlays: bool,
    icc: bool,
    peak_detect: bool,
    grain: bool,
    mixing: bool,
}

macro_rules! latch_accessor {
    ($field:ident, $is_disabled:ident, $trip:ident, $label:expr) => {
        pub fn $is_disabled(&self) -> bool {
            self.$field
        }
        pub fn $trip(&mut self) {
            if !self.$field {
                warn!(concat!($label, " disabled after failure"));
            }
            self.$field = true;
        }
    };
}

impl DegradationLatches {
    latch_accessor!(compute, compute_disabled, trip_compute, "compute dispatch");
    latch_accessor!(storable_intermediates, storable_intermediates_disabled, trip_storable_intermediates, "storable intermediates");
    latch_accessor!(linear_hdr, linear_hdr_disabled, trip_linear_hdr, "linear HDR processing");
    latch_accessor!(debanding, debanding_disabled, trip_debanding, "debanding");
    latch_accessor!(hooks, hooks_disabled, trip_hooks, "user hooks");
    latch_accessor!(scaler_complexity, scaler_complexity_disabled, trip_scaler_complexity, "complex scaling");
    latch_accessor!(overlays, overlays_disabled, trip_overlays, "overlays");
    latch_accessor!(icc, icc_disabled, trip_icc, "ICC profile handling");
    latch_accessor!(peak_detect, peak_detect_disabled, trip_peak_detect, "HDR peak detect");
    latch_accessor!(grain, grain_disabled, trip_grain, "AV1 film grain");
    latch_accessor!(mixing, mixing_disabled, trip_mixing, "frame mixing");
}

/// Caller-assembled planner configuration (§1.1 "Configuration").
#[derive(Copy, Clone, Debug)]
pub struct PlannerParams {
    pub max_planes: usize,
    pub allow_compute: bool,
    pub enable_debanding: bool,
    pub enable_grain: bool,
    pub enable_overlays: bool,
    pub delayed_peak_detect_allowed: bool,
    /// Epsilon around 1.0 a per-axis scale ratio must exceed to be considered up/downscaling
    /// rather than a no-op (§4.E phase 7).
    pub scale_epsilon: f32,
}

impl Default for PlannerParams {
    fn default() -> Self {
        PlannerParams {
            max_planes: 4,
            allow_compute: true,
            enable_debanding: true,
            enable_grain: true,
            enable_overlays: true,
            delayed_peak_detect_allowed: true,
            scale_epsilon: 1e-4,
        }
    }
}

/// A user-supplied transformation invoked at a named pipeline stage (GLOSSARY "Hook"); opaque to
/// this crate beyond its declared stage and resizing contract.
pub trait Hook {
    fn stage(&self) -> HookStage;
    /// Whether this hook may change the image's dimensions; non-resizable hooks that do so are a
    /// caller bug, not something this crate can detect generically.
    fn resizable(&self) -> bool;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum HookStage {
    PlaneInput(PlaneType),
    RgbStage,
    Linear,
    Sigmoid,
    PreOverlay,
    PreKernel,
    PostKernel,
    Scaled,
}

/// Phase 1 output: per-frame inference the rest of the planner consumes (§4.E phase 1).
pub struct FrameInference {
    pub reference_plane: usize,
    pub sample_depth: u8,
    pub bit_shift: u8,
}

/// Validates plane counts/component ids and infers sample/color depth (§4.E phase 1). Rejects
/// frames with no reference plane or an out-of-range plane count.
pub fn validate_and_infer(
    frame: &Frame,
    max_planes: usize,
    storage_format: Format,
) -> crate::error::Result<FrameInference> {
    if frame.planes.is_empty() || frame.planes.len() > max_planes {
        return Err(crate::error::Error::Validation("plane count out of range"));
    }
    if !frame.has_reference_plane() {
        return Err(crate::error::Error::Validation(
            "frame has no luma/RGB/XYZ reference plane",
        ));
    }
    let reference_plane = frame
        .planes
        .iter()
        .position(|p| {
            matches!(
                p.infer_type(frame.color_repr.system),
                PlaneType::Luma | PlaneType::Rgb | PlaneType::Xyz
            )
        })
        .unwrap();

    let sample_depth = if storage_format.is_unorm() {
        storage_format.first_component_depth() as u8
    } else {
        frame.color_repr.color_depth
    };
    let color_depth = frame.color_repr.color_depth.min(sample_depth);
    let bit_shift = sample_depth.saturating_sub(color_depth);

    Ok(FrameInference {
        reference_plane,
        sample_depth,
        bit_shift,
    })
}

/// Phase 2 output.
pub struct RectNormalization {
    pub src: Rect,
    pub dst: Rect,
    pub flip_x: bool,
    pub flip_y: bool,
}

/// Normalizes source/destination rects, rounds the destination to integer pixels clipped to the
/// target size, and rescales the source proportionally so the visible subregion is preserved
/// (§4.E phase 2).
///
/// Per the recorded open-question decision (DESIGN.md), a crop that is zero-area on exactly one
/// axis (not both) is rejected outright rather than silently falling back to full texture size.
pub fn normalize_rects(
    src: Rect,
    dst: Rect,
    target_w: u32,
    target_h: u32,
) -> crate::error::Result<RectNormalization> {
    let (src_norm, _, _) = src.normalize();
    let (dst_norm, flip_x, flip_y) = dst.normalize();

    let src_zero_x = src_norm.width() == 0.0;
    let src_zero_y = src_norm.height() == 0.0;
    if src_zero_x != src_zero_y {
        return Err(crate::error::Error::Validation(
            "crop is zero-area on exactly one axis",
        ));
    }

    let clipped_x0 = dst_norm.x0.max(0.0).round();
    let clipped_y0 = dst_norm.y0.max(0.0).round();
    let clipped_x1 = dst_norm.x1.min(target_w as f32).round();
    let clipped_y1 = dst_norm.y1.min(target_h as f32).round();
    let clipped_dst = Rect {
        x0: clipped_x0,
        y0: clipped_y0,
        x1: clipped_x1,
        y1: clipped_y1,
    };

    let scale_x = if dst_norm.width() != 0.0 {
        clipped_dst.width() / dst_norm.width()
    } else {
        1.0
    };
    let scale_y = if dst_norm.height() != 0.0 {
        clipped_dst.height() / dst_norm.height()
    } else {
        1.0
    };
    let adjusted_src = Rect {
        x0: src_norm.x0,
        y0: src_norm.y0,
        x1: src_norm.x0 + src_norm.width() * scale_x,
        y1: src_norm.y0 + src_norm.height() * scale_y,
    };

    Ok(RectNormalization {
        src: adjusted_src,
        dst: clipped_dst,
        flip_x,
        flip_y,
    })
}

/// Whether two planes should be merged into one wider-channel shader before further processing
/// (§4.E phase 3 "Plane read"): same logical type, same dimensions and sub-pixel shift, a format
/// exists supporting the combined channel count at the required depth, and merging would amortize
/// a nontrivial per-plane operation.
pub fn should_merge_planes(
    a_type: PlaneType,
    b_type: PlaneType,
    a_components: u32,
    b_components: u32,
    a_dims: (u32, u32),
    b_dims: (u32, u32),
    a_shift: (f32, f32),
    b_shift: (f32, f32),
    min_depth: u32,
    need_storage: bool,
    amortizes_nontrivial_op: bool,
) -> bool {
    if !amortizes_nontrivial_op {
        return false;
    }
    if a_type != b_type || a_dims != b_dims || a_shift != b_shift {
        return false;
    }
    Format::smallest_supporting(a_components + b_components, min_depth, need_storage).is_some()
}

/// Divides the frame crop by the plane's integer subsampling ratio, rounding the ratio away from
/// 1 so fractional subsampling (e.g. 4:2:0 on an odd-width frame) still yields a plane-local rect
/// that covers every sample (§4.E phase 3).
pub fn plane_sampling_rect(frame_crop: Rect, shift_x: f32, shift_y: f32, plane_w: u32, plane_h: u32, frame_w: u32, frame_h: u32) -> Rect {
    let ratio_x = round_away_from_one(frame_w as f32 / plane_w.max(1) as f32);
    let ratio_y = round_away_from_one(frame_h as f32 / plane_h.max(1) as f32);
    Rect {
        x0: frame_crop.x0 / ratio_x + shift_x,
        y0: frame_crop.y0 / ratio_y + shift_y,
        x1: frame_crop.x1 / ratio_x + shift_x,
        y1: frame_crop.y1 / ratio_y + shift_y,
    }
}

fn round_away_from_one(ratio: f32) -> f32 {
    if ratio > 1.0 {
        ratio.ceil()
    } else if ratio < 1.0 {
        1.0 / (1.0 / ratio).ceil()
    } else {
        1.0
    }
}

/// Sampler complexity the planner would dispatch for one scaling axis (§4.E phase 7).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SamplerChoice {
    NoOp,
    HardwareBilinear,
    HardwareBicubic,
    Polar,
    SeparableTwoPass,
}

/// Chooses a sampler based on per-axis scale ratios (§4.E phase 7): down if `ratio < 1 - eps`, up
/// if `ratio > 1 + eps`, otherwise treated as a no-op on that axis. `complex_filter_requested`
/// selects between hardware bilinear/bicubic and a software polar/separable kernel; `polar`
/// distinguishes a single-pass radially symmetric kernel from a two-pass orthogonal one.
pub fn choose_sampler(ratio_x: f32, ratio_y: f32, eps: f32, complex_filter_requested: bool, polar: bool) -> SamplerChoice {
    let scaling = (ratio_x - 1.0).abs() > eps || (ratio_y - 1.0).abs() > eps;
    if !scaling {
        return SamplerChoice::NoOp;
    }
    if !complex_filter_requested {
        return SamplerChoice::HardwareBilinear;
    }
    if polar {
        SamplerChoice::Polar
    } else {
        SamplerChoice::SeparableTwoPass
    }
}

/// Whether main-scale must round-trip through an intermediate texture even with no scaling
/// needed, because overlays, hooks, or a non-resizable upstream producer force FBO indirection
/// (§4.E phase 7).
pub fn needs_fbo_indirection(has_overlays: bool, has_non_scaled_hooks: bool, producer_is_non_resizable: bool) -> bool {
    has_overlays || has_non_scaled_hooks || producer_is_non_resizable
}

/// Whether HDR peak detection should attach to the current image (§4.E phase 6): the source is
/// HDR with a peak strictly greater than the target's, no conversion LUT already covers tone
/// mapping, and either delayed detection is allowed or intermediates are available.
pub fn should_attach_peak_detect(
    source_space: &ColorSpace,
    target_space: &ColorSpace,
    lut_is_full_conversion: bool,
    delayed_detect_allowed: bool,
    intermediates_available: bool,
    latches: &DegradationLatches,
) -> bool {
    if latches.peak_detect_disabled() {
        return false;
    }
    source_space.is_hdr() && source_space.peak > target_space.peak
        && !lut_is_full_conversion
        && (delayed_detect_allowed || intermediates_available)
}

/// Whether dithering should apply on output (§4.E phase 8): sample depth ≤ 16, or explicitly
/// forced by the caller.
pub fn should_dither(sample_depth: u8, forced: bool) -> bool {
    forced || sample_depth <= 16
}

/// Per-plane destination rect for the final write phase (§4.E phase 9): divides the already
/// integer-rounded frame destination rect by the plane's subsampling ratio, same convention as
/// [`plane_sampling_rect`].
pub fn plane_destination_rect(frame_dst: Rect, plane_w: u32, plane_h: u32, frame_w: u32, frame_h: u32) -> Rect {
    plane_sampling_rect(frame_dst, 0.0, 0.0, plane_w, plane_h, frame_w, frame_h)
}

/// Target-conversion path chosen at output (§4.E phase 8): ICC pair when both profiles differ,
/// else a direct color-space conversion.
pub fn output_conversion_uses_icc(source_icc: Option<&[u8]>, target_icc: Option<&[u8]>) -> bool {
    match (source_icc, target_icc) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    }
}

/// External shader generators the orchestrator calls at each phase that needs real pixel/color
/// math (§1 Non-goals: "implementing the individual image-processing algorithms" is out of
/// scope, just like scaler kernels, color conversion and dither are themselves external
/// collaborators per the GLOSSARY's framing). Each closure mutates the [`ShaderBuilder`] the
/// orchestrator hands it; this crate only decides whether and in what order to call them.
pub struct ShaderGenerators<'a> {
    /// Emits code sampling one source plane (by index into `source.planes`) into the current
    /// builder (§4.E phase 3 "Plane read").
    pub plane_read: &'a dyn Fn(&mut ShaderBuilder, usize),
    /// Emits code combining a group of already-read planes (by plane index) into one logical
    /// image (§4.E phase 3/4 "Plane combine").
    pub plane_combine: &'a dyn Fn(&mut ShaderBuilder, &[usize]),
    /// Emits the input color-space conversion to a working linear/RGB representation (§4.E phase
    /// 5).
    pub input_color_convert: &'a dyn Fn(&mut ShaderBuilder),
    /// Emits HDR peak-detection bookkeeping code (§4.E phase 6).
    pub peak_detect: &'a dyn Fn(&mut ShaderBuilder),
    /// Emits the main scale pass for the chosen sampler (§4.E phase 7).
    pub main_scale: &'a dyn Fn(&mut ShaderBuilder, SamplerChoice),
    /// Emits the output color-space conversion, `bool` is whether an ICC pair was chosen over a
    /// direct color-space conversion (§4.E phase 8).
    pub output_color_convert: &'a dyn Fn(&mut ShaderBuilder, bool),
    /// Emits dithering code ahead of the final write (§4.E phase 8).
    pub dither: &'a dyn Fn(&mut ShaderBuilder),
}

/// Orchestrates one full frame render: phases 1-9 of §4.E, sequenced for real, with the actual
/// per-algorithm shader bodies delegated to caller-supplied [`ShaderGenerators`]. Wraps the
/// degradation latches so a failed optional capability degrades the rest of this call instead of
/// aborting it.
#[derive(Default)]
pub struct Planner {
    pub latches: DegradationLatches,
}

impl Planner {
    pub fn new() -> Self {
        Planner::default()
    }

    /// Renders `source` into `target`, reusing `dispatch`'s compiled-pass cache and `pool` for
    /// any intermediate textures the generators need across the call.
    pub fn render(
        &mut self,
        source: &Frame,
        target: &Frame,
        params: &PlannerParams,
        generators: &ShaderGenerators,
        dispatch: &mut crate::dispatch::Dispatch,
        pool: &mut crate::pool::TexturePool,
        backend: &dyn crate::gpu::Backend,
    ) -> crate::error::Result<()> {
        pool.begin_frame();

        // Phase 1: validate plane counts/ids, infer sample depth and bit shift.
        let storage_format = target
            .planes
            .first()
            .map(|p| p.texture.format())
            .unwrap_or(Format::Rgba8Unorm);
        let inference = validate_and_infer(source, params.max_planes, storage_format)?;

        if target.planes.is_empty() {
            return Err(crate::error::Error::Validation("target frame has no planes to write to"));
        }
        let target_w = target.planes[0].texture.width();
        let target_h = target.planes[0].texture.height();

        // Phase 2: rect normalization.
        let norm = normalize_rects(source.crop, target.crop, target_w, target_h)?;

        // Phase 3: plane read, with adjacent-pair merge decisions (§4.E phase 3).
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut i = 0;
        while i < source.planes.len() {
            let mut group = vec![i];
            if i + 1 < source.planes.len() {
                let a = &source.planes[i];
                let b = &source.planes[i + 1];
                let merge = should_merge_planes(
                    a.infer_type(source.color_repr.system),
                    b.infer_type(source.color_repr.system),
                    a.component_count() as u32,
                    b.component_count() as u32,
                    (a.texture.width(), a.texture.height()),
                    (b.texture.width(), b.texture.height()),
                    (a.shift_x, a.shift_y),
                    (b.shift_x, b.shift_y),
                    inference.sample_depth as u32,
                    !self.latches.storable_intermediates_disabled(),
                    true,
                );
                if merge {
                    group.push(i + 1);
                    i += 1;
                }
            }
            groups.push(group);
            i += 1;
        }

        let mut img = Img {
            state: ImgState::Shader(ShaderBuilder::new(false)),
            width: target_w,
            height: target_h,
            src_rect: norm.src,
            color_repr: source.color_repr,
            color_space: source.color_space,
            components: 4,
        };

        for group in &groups {
            for &plane_idx in group {
                (generators.plane_read)(img.sample(), plane_idx);
            }
            if group.len() > 1 {
                (generators.plane_combine)(img.sample(), group);
            }
        }

        // Phase 5: input color conversion.
        (generators.input_color_convert)(img.sample());

        // Phase 6: HDR peak detect.
        let lut_is_full_conversion = matches!(
            source.lut.as_ref().map(|(kind, _)| *kind),
            Some(crate::frame_model::LutKind::Conversion)
        );
        if should_attach_peak_detect(
            &source.color_space,
            &target.color_space,
            lut_is_full_conversion,
            params.delayed_peak_detect_allowed,
            !self.latches.storable_intermediates_disabled(),
            &self.latches,
        ) {
            (generators.peak_detect)(img.sample());
        }

        // Phase 7: main scale.
        let ratio_x = norm.dst.width() / norm.src.width().abs().max(1e-6);
        let ratio_y = norm.dst.height() / norm.src.height().abs().max(1e-6);
        let sampler = choose_sampler(
            ratio_x,
            ratio_y,
            params.scale_epsilon,
            !self.latches.scaler_complexity_disabled(),
            false,
        );
        (generators.main_scale)(img.sample(), sampler);

        // Phase 8: output color conversion, then dither ahead of the final write.
        let icc = output_conversion_uses_icc(source.icc_profile.as_deref(), target.icc_profile.as_deref());
        (generators.output_color_convert)(img.sample(), icc);
        if should_dither(inference.sample_depth, false) && !self.latches.debanding_disabled() {
            (generators.dither)(img.sample());
        }

        // Phase 9: write to every target plane, each at its own subsampled destination rect. A
        // single accumulated builder is dispatched once per plane rather than routed through
        // `Img::materialize` (whose single-shot contract is for one destination, not N).
        let final_builder = match img.state {
            ImgState::Shader(builder) => builder,
            ImgState::Texture(_) => unreachable!("img stays in Shader state until this phase"),
        };
        for plane in &target.planes {
            let _dst_rect = plane_destination_rect(
                norm.dst,
                plane.texture.width(),
                plane.texture.height(),
                target_w,
                target_h,
            );
            dispatch.dispatch_builder(&final_builder, plane.texture.format(), crate::dispatch::Blend::None)?;
        }

        pool.sweep(backend, 4);
        Ok(())
    }
}
