//! GLSL-facing type descriptors used to describe shader-builder variables and descriptors.
//!
//! Grounded on `render/src/interface.rs`'s `TypeDesc`/`PrimitiveType`.

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PrimitiveType {
    Int,
    UnsignedInt,
    Float,
    Bool,
}

impl PrimitiveType {
    pub fn glsl_name(&self) -> &'static str {
        match self {
            PrimitiveType::Int => "int",
            PrimitiveType::UnsignedInt => "uint",
            PrimitiveType::Float => "float",
            PrimitiveType::Bool => "bool",
        }
    }
}

/// Type of a dispatch-engine variable (§3 "Variable placement", §4.C).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum TypeDesc {
    Primitive(PrimitiveType),
    /// Vector type (ty, size): not all sizes are valid (2..4).
    Vector(PrimitiveType, u8),
    /// Matrix type (ty, rows, cols).
    Matrix(PrimitiveType, u8, u8),
    /// Array of a fixed size.
    Array(Box<TypeDesc>, usize),
}

impl TypeDesc {
    pub const FLOAT: TypeDesc = TypeDesc::Primitive(PrimitiveType::Float);
    pub const INT: TypeDesc = TypeDesc::Primitive(PrimitiveType::Int);

    pub fn vec2() -> TypeDesc {
        TypeDesc::Vector(PrimitiveType::Float, 2)
    }
    pub fn vec3() -> TypeDesc {
        TypeDesc::Vector(PrimitiveType::Float, 3)
    }
    pub fn vec4() -> TypeDesc {
        TypeDesc::Vector(PrimitiveType::Float, 4)
    }
    pub fn mat3() -> TypeDesc {
        TypeDesc::Matrix(PrimitiveType::Float, 3, 3)
    }
    pub fn mat4() -> TypeDesc {
        TypeDesc::Matrix(PrimitiveType::Float, 4, 4)
    }

    /// Size in bytes using std140-ish scalar packing (4 bytes per component, no padding beyond
    /// what the uniform-buffer layout code adds explicitly).
    pub fn scalar_size(&self) -> usize {
        match self {
            TypeDesc::Primitive(_) => 4,
            TypeDesc::Vector(_, n) => 4 * (*n as usize),
            TypeDesc::Matrix(_, r, c) => 4 * (*r as usize) * (*c as usize),
            TypeDesc::Array(elem, count) => elem.scalar_size() * count,
        }
    }

    /// True for scalar/vector (non-array, non-matrix) types, the "small" types the placement
    /// algorithm prefers for push constants (§4.C).
    pub fn is_small(&self) -> bool {
        matches!(self, TypeDesc::Primitive(_) | TypeDesc::Vector(_, _))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeDesc::Array(_, _))
    }

    /// Alignment required by std140 uniform-buffer layout rules: scalars/vec2 align to their own
    /// size, vec3/vec4 and matrices align to 16 bytes, arrays align every element to 16 bytes.
    pub fn std140_align(&self) -> usize {
        match self {
            TypeDesc::Primitive(_) => 4,
            TypeDesc::Vector(_, 2) => 8,
            TypeDesc::Vector(_, _) => 16,
            TypeDesc::Matrix(_, _, _) => 16,
            TypeDesc::Array(_, _) => 16,
        }
    }

    pub fn glsl_type_name(&self) -> String {
        match self {
            TypeDesc::Primitive(p) => p.glsl_name().to_string(),
            TypeDesc::Vector(p, n) => {
                let prefix = match p {
                    PrimitiveType::Int => "i",
                    PrimitiveType::UnsignedInt => "u",
                    PrimitiveType::Bool => "b",
                    PrimitiveType::Float => "",
                };
                format!("{}vec{}", prefix, n)
            }
            TypeDesc::Matrix(_, r, c) => {
                if r == c {
                    format!("mat{}", r)
                } else {
                    format!("mat{}x{}", c, r)
                }
            }
            TypeDesc::Array(elem, count) => format!("{}[{}]", elem.glsl_type_name(), count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec4_is_small_and_16_bytes() {
        let v = TypeDesc::vec4();
        assert!(v.is_small());
        assert_eq!(v.scalar_size(), 16);
        assert_eq!(v.std140_align(), 16);
    }

    #[test]
    fn mat4_is_not_small() {
        let m = TypeDesc::mat4();
        assert!(!m.is_small());
        assert_eq!(m.scalar_size(), 64);
    }

    #[test]
    fn array_is_not_small() {
        let a = TypeDesc::Array(Box::new(TypeDesc::FLOAT), 4);
        assert!(!a.is_small());
        assert!(a.is_array());
        assert_eq!(a.scalar_size(), 16);
    }
}
