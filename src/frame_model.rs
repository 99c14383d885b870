//! Frame/plane/image data model (§3), shared by the render planner, frame cache and mixer.
//!
//! Mirrors the shape of `render/src/framebuffer.rs` and `render/src/image.rs`'s
//! `Dimensions`/`SamplerDescription`: plain data structs carrying just the fields downstream code
//! branches on, not a full color-management library.

use crate::gpu::{Format, Texture};
use std::rc::Rc;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ColorSystem {
    Rgb,
    YCbCr,
    Xyz,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Levels {
    Full,
    Limited,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AlphaMode {
    None,
    Independent,
    Premultiplied,
}

/// How samples are bit-packed into the plane's storage format (§3 "Frame").
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ColorRepr {
    pub system: ColorSystem,
    pub levels: Levels,
    pub alpha: AlphaMode,
    /// Number of significant bits per sample, always ≤ the storage format's bit depth.
    pub color_depth: u8,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TransferFunction {
    Srgb,
    Linear,
    Pq,
    Hlg,
}

/// Color-space metadata of a frame (§3). `peak` is in the transfer function's native nit scale;
/// `sig_scale` normalizes a signal whose nominal white point sits below `peak` (e.g. a
/// variable-peak HDR stream).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ColorSpace {
    pub primaries: Primaries,
    pub transfer: TransferFunction,
    pub peak: f32,
    pub sig_scale: f32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Primaries {
    Bt709,
    Bt2020,
    DciP3,
    Unknown,
}

impl ColorSpace {
    pub fn is_hdr(&self) -> bool {
        matches!(self.transfer, TransferFunction::Pq | TransferFunction::Hlg)
    }
}

/// A single logical channel a plane's texture component maps to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ChannelId {
    Luma,
    Cb,
    Cr,
    Red,
    Green,
    Blue,
    Alpha,
    /// Not mapped to anything meaningful (open question, see DESIGN.md: `0` is treated as a
    /// valid channel elsewhere, this variant is the explicit "none" sentinel).
    None,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PlaneType {
    Luma,
    Chroma,
    Alpha,
    Rgb,
    Xyz,
}

/// One texture of a multi-plane frame (§3 "Plane", GLOSSARY).
#[derive(Clone, Debug)]
pub struct Plane {
    pub texture: Rc<dyn Texture>,
    /// Texture channel index → logical channel id, length == component_count.
    pub component_mapping: Vec<ChannelId>,
    pub shift_x: f32,
    pub shift_y: f32,
}

impl Plane {
    pub fn component_count(&self) -> usize {
        self.component_mapping.len()
    }

    /// Derives this plane's logical type from its mapping under `system` (§4.E phase 1).
    pub fn infer_type(&self, system: ColorSystem) -> PlaneType {
        if self
            .component_mapping
            .iter()
            .any(|c| matches!(c, ChannelId::Alpha))
            && self
                .component_mapping
                .iter()
                .all(|c| matches!(c, ChannelId::Alpha | ChannelId::None))
        {
            return PlaneType::Alpha;
        }
        match system {
            ColorSystem::Xyz => PlaneType::Xyz,
            ColorSystem::Rgb => PlaneType::Rgb,
            ColorSystem::YCbCr => {
                if self
                    .component_mapping
                    .iter()
                    .any(|c| matches!(c, ChannelId::Cb | ChannelId::Cr))
                {
                    PlaneType::Chroma
                } else {
                    PlaneType::Luma
                }
            }
        }
    }
}

/// An axis-aligned rectangle in floating-point pixel space (§3 "Frame" crop rect).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Swaps coordinates so `x0 <= x1` and `y0 <= y1`, returning whether each axis was flipped
    /// (§4.E phase 2 "Rect normalization").
    pub fn normalize(&self) -> (Rect, bool, bool) {
        let (x0, x1, flip_x) = if self.x0 <= self.x1 {
            (self.x0, self.x1, false)
        } else {
            (self.x1, self.x0, true)
        };
        let (y0, y1, flip_y) = if self.y0 <= self.y1 {
            (self.y0, self.y1, false)
        } else {
            (self.y1, self.y0, true)
        };
        (Rect { x0, y0, x1, y1 }, flip_x, flip_y)
    }

    pub fn is_zero_area(&self) -> bool {
        self.width() == 0.0 || self.height() == 0.0
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LutKind {
    Native,
    Normalized,
    Conversion,
}

/// A full frame: 1..4 planes plus the metadata the planner needs to interpret them (§3 "Frame").
#[derive(Clone, Debug)]
pub struct Frame {
    pub planes: Vec<Plane>,
    pub color_repr: ColorRepr,
    pub color_space: ColorSpace,
    pub icc_profile: Option<Rc<[u8]>>,
    pub lut: Option<(LutKind, Rc<dyn Texture>)>,
    pub crop: Rect,
}

impl Frame {
    /// Validates the frame carries at least one plane with the reference sample grid
    /// (§3 invariant): a luma, RGB, or XYZ plane. Chroma-only/alpha-only frames are rejected.
    pub fn has_reference_plane(&self) -> bool {
        self.planes.iter().any(|p| {
            matches!(
                p.infer_type(self.color_repr.system),
                PlaneType::Luma | PlaneType::Rgb | PlaneType::Xyz
            )
        })
    }
}

/// In-flight image: either a completed texture or an unfinished shader under construction, never
/// both (§3 "Img"). The `Unset` placeholder only exists transiently inside `materialize`/`sample`
/// while swapping states.
pub enum ImgState {
    Texture(Rc<dyn Texture>),
    Shader(crate::shader_builder::ShaderBuilder),
}

pub struct Img {
    pub state: ImgState,
    pub width: u32,
    pub height: u32,
    pub src_rect: Rect,
    pub color_repr: ColorRepr,
    pub color_space: ColorSpace,
    pub components: u8,
}

impl Img {
    /// Swaps an in-progress shader state into a completed texture, dispatching this image's own
    /// accumulated builder through `dispatch`. No-op if already materialized.
    pub fn materialize(
        &mut self,
        dispatch: &mut crate::dispatch::Dispatch,
        target: &Rc<dyn Texture>,
    ) -> crate::error::Result<()> {
        let previous = std::mem::replace(&mut self.state, ImgState::Texture(target.clone()));
        if let ImgState::Shader(builder) = previous {
            dispatch.dispatch_builder(&builder, target.format(), crate::dispatch::Blend::None)?;
        }
        Ok(())
    }

    /// Returns this image's in-progress shader builder, lazily starting a fresh one (replacing a
    /// completed-texture state) if none is under construction yet. Accumulating sampling/body
    /// code is purely local to the builder until `materialize` actually dispatches it.
    pub fn sample(&mut self) -> &mut crate::shader_builder::ShaderBuilder {
        if !matches!(self.state, ImgState::Shader(_)) {
            self.state = ImgState::Shader(crate::shader_builder::ShaderBuilder::new(false));
        }
        match &mut self.state {
            ImgState::Shader(builder) => builder,
            ImgState::Texture(_) => unreachable!("just replaced with ImgState::Shader"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_normalize_detects_flip() {
        let r = Rect { x0: 10.0, y0: 0.0, x1: 0.0, y1: 5.0 };
        let (norm, flip_x, flip_y) = r.normalize();
        assert_eq!(norm.x0, 0.0);
        assert_eq!(norm.x1, 10.0);
        assert!(flip_x);
        assert!(!flip_y);
    }

    #[test]
    fn luma_only_plane_is_reference_plane() {
        let plane = Plane {
            texture: test_texture(),
            component_mapping: vec![ChannelId::Luma],
            shift_x: 0.0,
            shift_y: 0.0,
        };
        assert_eq!(plane.infer_type(ColorSystem::YCbCr), PlaneType::Luma);
    }

    #[test]
    fn chroma_plane_is_not_reference_plane() {
        let frame = Frame {
            planes: vec![Plane {
                texture: test_texture(),
                component_mapping: vec![ChannelId::Cb, ChannelId::Cr],
                shift_x: 0.5,
                shift_y: 0.5,
            }],
            color_repr: ColorRepr {
                system: ColorSystem::YCbCr,
                levels: Levels::Limited,
                alpha: AlphaMode::None,
                color_depth: 8,
            },
            color_space: ColorSpace {
                primaries: Primaries::Bt709,
                transfer: TransferFunction::Srgb,
                peak: 100.0,
                sig_scale: 1.0,
            },
            icc_profile: None,
            lut: None,
            crop: Rect { x0: 0.0, y0: 0.0, x1: 1.0, y1: 1.0 },
        };
        assert!(!frame.has_reference_plane());
    }

    fn test_texture() -> Rc<dyn Texture> {
        #[derive(Debug)]
        struct T;
        impl Texture for T {
            fn width(&self) -> u32 {
                4
            }
            fn height(&self) -> u32 {
                4
            }
            fn format(&self) -> Format {
                Format::R8Unorm
            }
        }
        Rc::new(T)
    }
}
