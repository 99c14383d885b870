//! The shader-builder: component B of the system (§2), the external collaborator that
//! accumulates GLSL source, variables, descriptor bindings and vertex attributes for one shader
//! under construction. Individual shader generators (scalers, color math, dither, ICC,
//! debanding, film grain) are themselves external and simply call the `push_*`/`body_mut`
//! methods below to mutate a builder handed to them by the planner — this crate only defines the
//! accumulator they mutate and the signature it produces for the dispatch engine.
//!
//! Grounded on `render/src/pipeline/mod.rs` (`ShaderStageFlags`, `VertexInputAttributeDescription`)
//! and `render/src/descriptor.rs` (`DescriptorSetLayoutBinding`, `DescriptorType`).

use crate::gpu::Format;
use crate::typedesc::TypeDesc;
use bitflags::bitflags;
use std::hash::{Hash, Hasher};

bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX   = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE  = 1 << 2;
    }
}

bitflags! {
    /// Extensions/capabilities a shader may require (§4.C "Shader source generation").
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct RequiredCaps: u32 {
        const IMAGE_LOAD_STORE      = 1 << 0;
        const UNIFORM_BUFFER        = 1 << 1;
        const STORAGE_BUFFER        = 1 << 2;
        const TEXEL_BUFFER          = 1 << 3;
        const EXTERNAL_SAMPLER      = 1 << 4;
        const FORMAT_UNSPECIFIED_IMAGE = 1 << 5;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DescriptorType {
    Sampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
}

/// A variable the user body references; bound at dispatch time by the placement algorithm
/// (§4.C).
#[derive(Clone, Debug)]
pub struct Variable {
    pub name: String,
    pub ty: TypeDesc,
    /// Explicitly marked as varying call-to-call; influences the placement algorithm's
    /// preference for push constants (§4.C).
    pub dynamic: bool,
    /// Current value, zero-initialized at declaration. Not part of the signature — only the
    /// declared shape participates in cache identity (§4.C "Variable upload").
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub name: String,
    pub kind: DescriptorType,
    pub format: Option<Format>,
    pub stage_flags: ShaderStageFlags,
}

#[derive(Copy, Clone, Debug)]
pub struct VertexAttribute {
    pub location: u32,
    pub components: u8,
    /// If this is the position attribute used to emit `gl_Position` (§4.C vertex passthrough).
    pub is_position: bool,
}

/// A shader under construction. Returned by `Dispatch::begin`, mutated by shader generators,
/// consumed by `Dispatch::finish`/`compute`/`vertex`/`abort`.
#[derive(Clone, Debug)]
pub struct ShaderBuilder {
    /// Fresh identifier assigned by `begin(unique = true)`, used for name mangling so that two
    /// concurrently-live unique shaders never collide on symbol names.
    pub(crate) id: Option<u64>,
    body: String,
    variables: Vec<Variable>,
    descriptors: Vec<DescriptorBinding>,
    vertex_attributes: Vec<VertexAttribute>,
    required_caps: RequiredCaps,
    is_compute: bool,
    /// 3x3 coordinate projection applied to the position attribute before `gl_Position` (§4.C).
    pub coord_projection: Option<[f32; 9]>,
}

impl ShaderBuilder {
    pub fn new(is_compute: bool) -> Self {
        ShaderBuilder {
            id: None,
            body: String::new(),
            variables: Vec::new(),
            descriptors: Vec::new(),
            vertex_attributes: Vec::new(),
            required_caps: RequiredCaps::empty(),
            is_compute,
            coord_projection: None,
        }
    }

    pub fn is_compute(&self) -> bool {
        self.is_compute
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn push_body(&mut self, glsl: &str) -> &mut Self {
        self.body.push_str(glsl);
        self
    }

    pub fn clear(&mut self) {
        self.id = None;
        self.body.clear();
        self.variables.clear();
        self.descriptors.clear();
        self.vertex_attributes.clear();
        self.required_caps = RequiredCaps::empty();
        self.coord_projection = None;
    }

    pub fn push_variable(&mut self, name: impl Into<String>, ty: TypeDesc, dynamic: bool) -> usize {
        let bytes = vec![0u8; ty.scalar_size()];
        self.variables.push(Variable {
            name: name.into(),
            ty,
            dynamic,
            bytes,
        });
        self.variables.len() - 1
    }

    /// Overwrites the current value of a declared variable. Panics if `bytes.len()` doesn't
    /// match the variable's declared `scalar_size()`.
    pub fn set_variable_bytes(&mut self, index: usize, bytes: Vec<u8>) {
        assert_eq!(
            bytes.len(),
            self.variables[index].ty.scalar_size(),
            "variable byte length must match its declared type size"
        );
        self.variables[index].bytes = bytes;
    }

    pub fn push_descriptor(
        &mut self,
        name: impl Into<String>,
        kind: DescriptorType,
        format: Option<Format>,
        stage_flags: ShaderStageFlags,
    ) -> u32 {
        let binding = self.descriptors.len() as u32;
        self.descriptors.push(DescriptorBinding {
            binding,
            name: name.into(),
            kind,
            format,
            stage_flags,
        });
        match kind {
            DescriptorType::UniformBuffer => self.required_caps |= RequiredCaps::UNIFORM_BUFFER,
            DescriptorType::StorageBuffer => self.required_caps |= RequiredCaps::STORAGE_BUFFER,
            DescriptorType::StorageImage => self.required_caps |= RequiredCaps::IMAGE_LOAD_STORE,
            _ => {}
        }
        if format.is_none() && matches!(kind, DescriptorType::StorageImage) {
            self.required_caps |= RequiredCaps::FORMAT_UNSPECIFIED_IMAGE;
        }
        binding
    }

    pub fn push_vertex_attribute(&mut self, components: u8, is_position: bool) -> u32 {
        let location = self.vertex_attributes.len() as u32;
        self.vertex_attributes.push(VertexAttribute {
            location,
            components,
            is_position,
        });
        location
    }

    pub fn require(&mut self, caps: RequiredCaps) {
        self.required_caps |= caps;
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn descriptors(&self) -> &[DescriptorBinding] {
        &self.descriptors
    }

    pub fn vertex_attributes(&self) -> &[VertexAttribute] {
        &self.vertex_attributes
    }

    pub fn required_caps(&self) -> RequiredCaps {
        self.required_caps
    }

    /// Stable content hash of body + variables + descriptors + vertex attributes + required
    /// capabilities (§4.C "Pass lookup"). Two builders with identical declared content hash
    /// identically regardless of construction order of independent `push_*` calls that don't
    /// affect observable content (position in the respective vecs does matter, since binding
    /// indices and vertex locations are assigned positionally).
    pub fn signature(&self) -> u64 {
        let mut hasher = fxhash::FxHasher::default();
        self.body.hash(&mut hasher);
        for v in &self.variables {
            v.name.hash(&mut hasher);
            v.ty.hash(&mut hasher);
            v.dynamic.hash(&mut hasher);
        }
        for d in &self.descriptors {
            d.binding.hash(&mut hasher);
            d.name.hash(&mut hasher);
            (d.kind as u8 as u32 + 1).hash(&mut hasher);
            d.format.hash(&mut hasher);
            d.stage_flags.bits().hash(&mut hasher);
        }
        for a in &self.vertex_attributes {
            a.location.hash(&mut hasher);
            a.components.hash(&mut hasher);
            a.is_position.hash(&mut hasher);
        }
        self.required_caps.bits().hash(&mut hasher);
        self.is_compute.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_builders_produce_identical_signatures() {
        let mut a = ShaderBuilder::new(false);
        a.push_body("vec4 main_() { return vec4(1.0); }");
        a.push_variable("scale", TypeDesc::FLOAT, true);
        a.push_descriptor("tex", DescriptorType::SampledImage, None, ShaderStageFlags::FRAGMENT);

        let mut b = ShaderBuilder::new(false);
        b.push_body("vec4 main_() { return vec4(1.0); }");
        b.push_variable("scale", TypeDesc::FLOAT, true);
        b.push_descriptor("tex", DescriptorType::SampledImage, None, ShaderStageFlags::FRAGMENT);

        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn different_body_changes_signature() {
        let mut a = ShaderBuilder::new(false);
        a.push_body("vec4 main_() { return vec4(1.0); }");
        let mut b = ShaderBuilder::new(false);
        b.push_body("vec4 main_() { return vec4(0.0); }");
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn clear_resets_to_fresh_state() {
        let mut a = ShaderBuilder::new(false);
        a.push_body("x");
        a.push_variable("v", TypeDesc::FLOAT, false);
        a.clear();
        let b = ShaderBuilder::new(false);
        assert_eq!(a.signature(), b.signature());
    }
}
