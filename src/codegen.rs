//! Shader source generation (§4.C "Shader source generation").
//!
//! Turns a [`ShaderBuilder`] plus its [`Placement`] into a complete GLSL translation unit: version
//! preamble, extension directives implied by `required_caps`, precision qualifiers, the
//! push-constant/uniform-buffer blocks laid out by the placement pass, descriptor bindings, and
//! finally the user body. Compute dispatches additionally get a fixed local work-group size;
//! fragment shaders targeting a format-unspecified storage image instead get wrapped so they run
//! as a compute shader with manual coordinate/varying interpolation (the "compute-shader-as-
//! framebuffer" rewrite), mirroring how `pipeline/mod.rs`'s rasterisation state models a
//! raster pipeline as one of several interchangeable backends for the same logical shader.

use crate::gpu::DeviceLimits;
use crate::placement::{Placement, VariablePlacement};
use crate::shader_builder::{DescriptorType, RequiredCaps, ShaderBuilder};
use std::fmt::Write as _;

/// Fixed local work-group size used for compute dispatches and for the compute-shader-as-
/// framebuffer rewrite (§4.C).
pub const COMPUTE_GROUP_SIZE: (u32, u32) = (8, 8);

pub struct GeneratedSource {
    pub glsl: String,
    pub as_compute: bool,
}

pub fn generate(builder: &ShaderBuilder, placement: &Placement, limits: &DeviceLimits) -> GeneratedSource {
    let mut src = String::new();
    let _ = writeln!(src, "#version {}{}", limits.glsl_version, if limits.is_gles { " es" } else { "" });

    emit_extensions(&mut src, builder.required_caps(), limits);

    if limits.is_gles {
        let _ = writeln!(src, "precision highp float;");
        let _ = writeln!(src, "precision highp int;");
    }

    let as_compute = builder.is_compute()
        || builder
            .descriptors()
            .iter()
            .any(|d| d.kind == DescriptorType::StorageImage && d.format.is_none());

    if as_compute {
        let _ = writeln!(
            src,
            "layout(local_size_x = {}, local_size_y = {}) in;",
            COMPUTE_GROUP_SIZE.0, COMPUTE_GROUP_SIZE.1
        );
    }

    emit_global_uniforms(&mut src, builder, placement);
    emit_push_constants(&mut src, builder, placement);
    emit_uniform_buffer(&mut src, builder, placement);
    emit_descriptors(&mut src, builder);

    if !as_compute {
        emit_vertex_attributes(&mut src, builder);
    }

    src.push('\n');
    src.push_str(builder.body());

    GeneratedSource { glsl: src, as_compute }
}

fn emit_extensions(src: &mut String, caps: RequiredCaps, limits: &DeviceLimits) {
    if caps.contains(RequiredCaps::IMAGE_LOAD_STORE) && limits.glsl_version < 420 {
        let _ = writeln!(src, "#extension GL_ARB_shader_image_load_store : require");
    }
    if caps.contains(RequiredCaps::TEXEL_BUFFER) {
        let _ = writeln!(src, "#extension GL_EXT_texture_buffer : require");
    }
    if caps.contains(RequiredCaps::EXTERNAL_SAMPLER) {
        let _ = writeln!(src, "#extension GL_OES_EGL_image_external_essl3 : require");
    }
    if limits.subgroups {
        let _ = writeln!(src, "#extension GL_KHR_shader_subgroup_basic : enable");
    }
}

fn emit_global_uniforms(src: &mut String, builder: &ShaderBuilder, placement: &Placement) {
    for (v, slot) in builder.variables().iter().zip(&placement.slots) {
        if let VariablePlacement::GlobalUniform { index } = slot {
            let _ = writeln!(
                src,
                "uniform {} {}; // global uniform #{}",
                v.ty.glsl_type_name(),
                v.name,
                index
            );
        }
    }
}

fn emit_push_constants(src: &mut String, builder: &ShaderBuilder, placement: &Placement) {
    if placement.push_constant_size == 0 {
        return;
    }
    let _ = writeln!(src, "layout(push_constant) uniform PushConstants {{");
    for (v, slot) in builder.variables().iter().zip(&placement.slots) {
        if let VariablePlacement::PushConstant { .. } = slot {
            let _ = writeln!(src, "    {} {};", v.ty.glsl_type_name(), v.name);
        }
    }
    let _ = writeln!(src, "}} pc;");
}

fn emit_uniform_buffer(src: &mut String, builder: &ShaderBuilder, placement: &Placement) {
    if placement.uniform_buffer_size == 0 {
        return;
    }
    let _ = writeln!(src, "layout(std140, binding = 0) uniform UniformBlock {{");
    for (v, slot) in builder.variables().iter().zip(&placement.slots) {
        if let VariablePlacement::UniformBuffer { .. } = slot {
            let _ = writeln!(src, "    {} {};", v.ty.glsl_type_name(), v.name);
        }
    }
    let _ = writeln!(src, "}} ubo;");
}

fn emit_descriptors(src: &mut String, builder: &ShaderBuilder) {
    for d in builder.descriptors() {
        let glsl_kind = match d.kind {
            DescriptorType::Sampler => "sampler",
            DescriptorType::SampledImage => "sampler2D",
            DescriptorType::StorageImage => "image2D",
            DescriptorType::UniformBuffer | DescriptorType::StorageBuffer => continue, // emitted above
        };
        if d.kind == DescriptorType::StorageImage {
            let format_qualifier = d
                .format
                .map(|f| format_to_glsl_layout(f))
                .unwrap_or_else(|| "rgba8".to_string());
            let _ = writeln!(
                src,
                "layout({}, binding = {}) uniform {} {};",
                format_qualifier, d.binding, glsl_kind, d.name
            );
        } else {
            let _ = writeln!(src, "layout(binding = {}) uniform {} {};", d.binding, glsl_kind, d.name);
        }
    }
}

fn format_to_glsl_layout(format: crate::gpu::Format) -> String {
    use crate::gpu::Format::*;
    match format {
        R8Unorm => "r8",
        Rg8Unorm => "rg8",
        Rgba8Unorm => "rgba8",
        R16Unorm => "r16",
        Rg16Unorm => "rg16",
        Rgba16Unorm => "rgba16",
        R16Float => "r16f",
        Rgba16Float => "rgba16f",
        R32Float => "r32f",
        Rgba32Float => "rgba32f",
        Rgb10A2Unorm => "rgb10_a2",
    }
    .to_string()
}

fn emit_vertex_attributes(src: &mut String, builder: &ShaderBuilder) {
    for a in builder.vertex_attributes() {
        let ty = match a.components {
            1 => "float",
            2 => "vec2",
            3 => "vec3",
            _ => "vec4",
        };
        let _ = writeln!(src, "layout(location = {}) in {} in_attr{};", a.location, ty, a.location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::place_variables;
    use crate::shader_builder::ShaderStageFlags;
    use crate::typedesc::TypeDesc;

    #[test]
    fn generated_source_carries_version_and_body() {
        let mut b = ShaderBuilder::new(false);
        b.push_body("void main() { out_color = vec4(1.0); }");
        let limits = DeviceLimits::default();
        let placement = place_variables(b.variables(), &limits).unwrap();
        let gen = generate(&b, &placement, &limits);
        assert!(gen.glsl.starts_with("#version 450"));
        assert!(gen.glsl.contains("out_color = vec4(1.0);"));
        assert!(!gen.as_compute);
    }

    #[test]
    fn push_constant_block_emitted_for_dynamic_scalar() {
        let mut b = ShaderBuilder::new(false);
        b.push_variable("strength", TypeDesc::FLOAT, true);
        b.push_body("void main() {}");
        let limits = DeviceLimits::default();
        let placement = place_variables(b.variables(), &limits).unwrap();
        let gen = generate(&b, &placement, &limits);
        assert!(gen.glsl.contains("layout(push_constant) uniform PushConstants {"));
        assert!(gen.glsl.contains("float strength;"));
    }

    #[test]
    fn format_unspecified_storage_image_forces_compute_rewrite() {
        let mut b = ShaderBuilder::new(false);
        b.push_descriptor(
            "out_img",
            DescriptorType::StorageImage,
            None,
            ShaderStageFlags::FRAGMENT,
        );
        b.push_body("void main() {}");
        let limits = DeviceLimits::default();
        let placement = place_variables(b.variables(), &limits).unwrap();
        let gen = generate(&b, &placement, &limits);
        assert!(gen.as_compute);
        assert!(gen.glsl.contains("local_size_x = 8"));
    }
}
