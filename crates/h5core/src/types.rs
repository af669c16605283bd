//! Element types and datatype classification.

use std::sync::Arc;

use h5core_format::datatype::{Datatype, Endian};
use h5core_io::FileIdentity;

/// A native element type that can be read and written directly.
pub trait Element: bytemuck::Pod + Send + Sync + 'static {
    /// The datatype describing `Self` in native byte order.
    fn datatype() -> Datatype;
}

macro_rules! int_element {
    ($($t:ty => $signed:expr),* $(,)?) => {$(
        impl Element for $t {
            fn datatype() -> Datatype {
                Datatype::integer(std::mem::size_of::<$t>() as u32, $signed, Endian::native())
            }
        }
    )*};
}

int_element! {
    u8 => false, u16 => false, u32 => false, u64 => false,
    i8 => true, i16 => true, i32 => true, i64 => true,
}

impl Element for f32 {
    fn datatype() -> Datatype {
        Datatype::float32(Endian::native())
    }
}

impl Element for f64 {
    fn datatype() -> Datatype {
        Datatype::float64(Endian::native())
    }
}

/// Datatype class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    Integer,
    Float,
    Time,
    String,
    BitField,
    Opaque,
    Compound,
    Reference,
    Enum,
    VarLen,
    Array,
}

/// Classify a datatype.
pub fn classify(dtype: &Datatype) -> TypeClass {
    match dtype {
        Datatype::FixedPoint { .. } => TypeClass::Integer,
        Datatype::FloatingPoint { .. } => TypeClass::Float,
        Datatype::Time { .. } => TypeClass::Time,
        Datatype::String { .. } => TypeClass::String,
        Datatype::BitField { .. } => TypeClass::BitField,
        Datatype::Opaque { .. } => TypeClass::Opaque,
        Datatype::Compound { .. } => TypeClass::Compound,
        Datatype::Reference { .. } => TypeClass::Reference,
        Datatype::Enumeration { .. } => TypeClass::Enum,
        Datatype::VariableLength { .. } => TypeClass::VarLen,
        Datatype::Array { .. } => TypeClass::Array,
    }
}

/// Where a datatype's embedded values (heap ids, references) are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeLocation {
    Memory,
    File(FileIdentity),
}

/// A datatype bound to a location.
///
/// Types without file-bound values are shared between bindings; the others
/// are deep-copied so each file owns its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundType {
    dtype: Arc<Datatype>,
    location: TypeLocation,
}

impl BoundType {
    pub fn memory(dtype: Datatype) -> BoundType {
        BoundType {
            dtype: Arc::new(dtype),
            location: TypeLocation::Memory,
        }
    }

    /// Bind to `file`, copying the type if it is relocatable.
    pub fn bind(&self, file: FileIdentity) -> BoundType {
        let dtype = if self.dtype.is_relocatable() {
            Arc::new(Datatype::clone(&self.dtype))
        } else {
            Arc::clone(&self.dtype)
        };
        BoundType {
            dtype,
            location: TypeLocation::File(file),
        }
    }

    pub fn datatype(&self) -> &Datatype {
        &self.dtype
    }

    pub fn location(&self) -> TypeLocation {
        self.location
    }

    pub fn size(&self) -> usize {
        self.dtype.size() as usize
    }

    pub(crate) fn shares_with(&self, other: &BoundType) -> bool {
        Arc::ptr_eq(&self.dtype, &other.dtype)
    }
}

#[cfg(test)]
mod tests {
    use h5core_format::datatype::ReferenceType;

    use super::*;

    const FILE: FileIdentity = FileIdentity {
        device: 1,
        inode: 2,
    };

    #[test]
    fn native_types() {
        assert_eq!(i32::datatype(), Datatype::integer(4, true, Endian::native()));
        assert_eq!(u8::datatype().size(), 1);
        assert_eq!(classify(&f64::datatype()), TypeClass::Float);
        assert_eq!(classify(&Datatype::vlen_string()), TypeClass::VarLen);
    }

    #[test]
    fn plain_types_are_shared_on_bind() {
        let mem = BoundType::memory(Datatype::float32(Endian::Little));
        let bound = mem.bind(FILE);
        assert!(bound.shares_with(&mem));
        assert_eq!(bound.location(), TypeLocation::File(FILE));
    }

    #[test]
    fn relocatable_types_are_copied_on_bind() {
        let mem = BoundType::memory(Datatype::Reference {
            size: 8,
            ref_type: ReferenceType::Object,
        });
        let bound = mem.bind(FILE);
        assert!(!bound.shares_with(&mem));
        assert_eq!(bound.datatype(), mem.datatype());
    }
}
