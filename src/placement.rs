//! Two-pass greedy variable placement (§3 "Variable placement", §4.C).
//!
//! Each shader variable ends up in exactly one of three homes: a push-constant range (cheapest
//! to update, capacity-limited), a uniform-buffer range, or a runtime-updatable "global uniform"
//! (a loose GLSL `uniform`, still mutable via a variable-update record, just not packed into
//! either buffer). The algorithm runs two passes: a first, conservative pass places only small
//! or explicitly dynamic variables into push constants; a second pass retries push constants for
//! anything still unplaced, then falls to the uniform buffer for non-dynamic variables, and
//! finally to a global uniform. This mirrors the allocation style of
//! `src/renderer/backend/gl/pool.rs`'s `Pool::alloc`: scan for a fit, else fail outright rather
//! than evict or compact.

use crate::error::{Error, Result};
use crate::gpu::DeviceLimits;
use crate::shader_builder::Variable;
use crate::typedesc::TypeDesc;

/// Where a single variable ended up after placement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VariablePlacement {
    /// Not referenced by the shader body; no storage allocated.
    Unplaced,
    /// A loose, runtime-updatable GLSL `uniform` outside any buffer; `index` identifies it for
    /// source generation and for `Backend::update_global_uniform`.
    GlobalUniform { index: usize },
    /// Lives in the uniform buffer at the given byte range.
    UniformBuffer { offset: u32, size: u32 },
    /// Lives in the push-constant range at the given byte offset.
    PushConstant { offset: u32, size: u32 },
}

/// Result of running the placement algorithm over one shader's variable list.
#[derive(Clone, Debug, Default)]
pub struct Placement {
    pub slots: Vec<VariablePlacement>,
    pub push_constant_size: u32,
    pub uniform_buffer_size: u32,
}

/// Places `variables` into push constants, the uniform buffer, or global uniforms, respecting
/// `limits`.
///
/// Pass 1 (conservative): a variable that is "small" (scalar/vector) or explicitly dynamic is
/// tentatively placed in push constants if it fits; everything else is left unplaced.
///
/// Pass 2 (greedy fallback), over whatever pass 1 left unplaced: retry push constants with no
/// "small" restriction; if it still doesn't fit and the variable is non-dynamic, place it in the
/// uniform buffer; otherwise fall back to a global uniform if the backend supports loose
/// uniforms (`limits.input_variables`). A variable that fits nowhere fails placement outright
/// (§4.C: no eviction or compaction).
pub fn place_variables(variables: &[Variable], limits: &DeviceLimits) -> Result<Placement> {
    let mut slots = vec![VariablePlacement::Unplaced; variables.len()];
    let mut push_cursor: u32 = 0;
    let mut ubo_cursor: u32 = 0;
    let mut global_index = 0usize;
    let push_constants_supported = limits.push_constant_size > 0;
    let uniform_buffer_supported = limits.max_ubo_size > 0;

    // Pass 1: tentatively place small or dynamic variables into push constants.
    for (i, v) in variables.iter().enumerate() {
        if !push_constants_supported || !(v.ty.is_small() || v.dynamic) {
            continue;
        }
        let size = v.ty.scalar_size() as u32;
        let align = v.ty.std140_align() as u32;
        let push_offset = align_up(push_cursor, align);
        if push_offset + size <= limits.push_constant_size {
            slots[i] = VariablePlacement::PushConstant {
                offset: push_offset,
                size,
            };
            push_cursor = push_offset + size;
        }
    }

    // Pass 2: place whatever pass 1 left unplaced.
    for (i, v) in variables.iter().enumerate() {
        if !matches!(slots[i], VariablePlacement::Unplaced) {
            continue;
        }
        let size = v.ty.scalar_size() as u32;
        let align = v.ty.std140_align() as u32;

        if push_constants_supported {
            let push_offset = align_up(push_cursor, align);
            if push_offset + size <= limits.push_constant_size {
                slots[i] = VariablePlacement::PushConstant {
                    offset: push_offset,
                    size,
                };
                push_cursor = push_offset + size;
                continue;
            }
        }

        if uniform_buffer_supported && !v.dynamic {
            let ubo_offset = align_up(ubo_cursor, align);
            if ubo_offset + size <= limits.max_ubo_size {
                slots[i] = VariablePlacement::UniformBuffer {
                    offset: ubo_offset,
                    size,
                };
                ubo_cursor = ubo_offset + size;
                continue;
            }
        }

        if limits.input_variables {
            slots[i] = VariablePlacement::GlobalUniform { index: global_index };
            global_index += 1;
            continue;
        }

        return Err(Error::PlacementFailed(v.name.clone()));
    }

    Ok(Placement {
        slots,
        push_constant_size: push_cursor,
        uniform_buffer_size: ubo_cursor,
    })
}

fn align_up(offset: u32, align: u32) -> u32 {
    (offset + align - 1) / align * align
}

/// Upper bound on uniform-buffer bytes a list of variables could ever need, ignoring placement
/// choice. Used by the dispatch engine to decide whether a uniform buffer is worth allocating at
/// all before running the real placement pass.
pub fn worst_case_uniform_buffer_size(variables: &[Variable]) -> u32 {
    variables
        .iter()
        .filter(|v| !v.dynamic)
        .map(|v| {
            let size = v.ty.scalar_size() as u32;
            let align = v.ty.std140_align() as u32;
            align_up(size, align)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typedesc::PrimitiveType;

    fn limits() -> DeviceLimits {
        DeviceLimits {
            push_constant_size: 32,
            max_ubo_size: 1024,
            ..Default::default()
        }
    }

    fn var(name: &str, ty: TypeDesc, dynamic: bool) -> Variable {
        let bytes = vec![0u8; ty.scalar_size()];
        Variable { name: name.into(), ty, dynamic, bytes }
    }

    #[test]
    fn small_dynamic_variable_goes_to_push_constants() {
        let vars = vec![var("scale", TypeDesc::FLOAT, true)];
        let p = place_variables(&vars, &limits()).unwrap();
        assert!(matches!(p.slots[0], VariablePlacement::PushConstant { offset: 0, size: 4 }));
    }

    #[test]
    fn dynamic_matrix_overflowing_push_constants_falls_to_global_uniform() {
        // Dynamic variables skip the uniform-buffer branch (§4.C pass 2: UBO is only offered to
        // non-dynamic variables), so an oversized dynamic matrix falls straight to a global.
        let vars = vec![var("transform", TypeDesc::mat4(), true)];
        let p = place_variables(&vars, &limits()).unwrap();
        assert!(matches!(p.slots[0], VariablePlacement::GlobalUniform { index: 0 }));
        assert_eq!(p.push_constant_size, 0);
    }

    #[test]
    fn non_dynamic_matrix_overflowing_push_constants_goes_to_uniform_buffer() {
        let vars = vec![var("transform", TypeDesc::mat4(), false)];
        let p = place_variables(&vars, &limits()).unwrap();
        assert!(matches!(p.slots[0], VariablePlacement::UniformBuffer { offset: 0, size: 64 }));
    }

    #[test]
    fn variable_too_large_for_uniform_buffer_fails() {
        let mut lim = limits();
        lim.input_variables = false;
        let vars = vec![var(
            "huge",
            TypeDesc::Array(Box::new(TypeDesc::Primitive(PrimitiveType::Float)), 4096),
            true,
        )];
        let err = place_variables(&vars, &lim).unwrap_err();
        assert!(matches!(err, Error::PlacementFailed(name) if name == "huge"));
    }

    #[test]
    fn multiple_small_variables_pack_sequentially() {
        let vars = vec![
            var("a", TypeDesc::FLOAT, true),
            var("b", TypeDesc::FLOAT, true),
        ];
        let p = place_variables(&vars, &limits()).unwrap();
        assert!(matches!(p.slots[0], VariablePlacement::PushConstant { offset: 0, size: 4 }));
        assert!(matches!(p.slots[1], VariablePlacement::PushConstant { offset: 4, size: 4 }));
        assert_eq!(p.push_constant_size, 8);
    }
}
