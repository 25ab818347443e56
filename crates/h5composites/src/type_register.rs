//! Names of the Rust types stored in a file, mapped to small integer ids.
//!
//! A file written with a register carries the register as a committed
//! enumeration datatype. Scalar datasets record the id of the type they
//! hold in a "typeID" attribute of that enumeration, so that the names
//! survive even when another program numbers its types differently.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};

use h5composites_format::type_builders::EnumTypeBuilder;

use crate::buffer::{H5BufferConstView, H5BufferView};
use crate::dtype::{DType, DTypeClass, DTypeExt};
use crate::enum_utils::enum_name_of_raw;
use crate::error::{Error, Result};
use crate::traits::{BufferRead, BufferWrite, H5DType, StaticH5DType};

/// Id of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u16);

impl TypeId {
    /// Id of types without a registered name.
    pub const NULL: TypeId = TypeId(u16::MAX);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl Default for TypeId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl H5DType for TypeId {
    fn h5_dtype(&self) -> DType {
        DType::native_u16()
    }
}

impl StaticH5DType for TypeId {
    fn static_h5_dtype() -> DType {
        DType::native_u16()
    }
}

impl BufferWrite for TypeId {
    fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        self.0.write_native(view)
    }
}

impl BufferRead for TypeId {
    fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self> {
        u16::read_buffer(view).map(TypeId)
    }
}

/// A type stored under a registered name.
pub trait HasTypeId {
    fn type_name() -> &'static str;

    fn registered_id(register: &TypeRegister) -> Result<TypeId> {
        register.id_of(Self::type_name())
    }
}

/// Mapping between type names and ids.
#[derive(Debug, Clone, Default)]
pub struct TypeRegister {
    next_id: u16,
    locked: bool,
    ids: BTreeMap<String, TypeId>,
}

impl TypeRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide register.
    pub fn global() -> &'static Mutex<TypeRegister> {
        static GLOBAL: OnceLock<Mutex<TypeRegister>> = OnceLock::new();
        GLOBAL.get_or_init(|| Mutex::new(TypeRegister::new()))
    }

    /// Give `name` the next free id.
    pub fn register_type(&mut self, name: &str) -> Result<TypeId> {
        if self.locked {
            return Err(Error::Register("Cannot modify locked register".into()));
        }
        if self.ids.contains_key(name) {
            return Err(Error::Register(format!(
                "Cannot re-register type '{name}'!"
            )));
        }
        if self.next_id == TypeId::NULL.0 {
            return Err(Error::Register("Type register is full".into()));
        }
        let id = TypeId(self.next_id);
        self.next_id += 1;
        self.ids.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Register `T` under its type name.
    pub fn register<T: HasTypeId>(&mut self) -> Result<TypeId> {
        self.register_type(T::type_name())
    }

    pub fn id_of(&self, name: &str) -> Result<TypeId> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| Error::Register(format!("Unknown type '{name}'")))
    }

    pub fn name_of(&self, id: TypeId) -> Result<&str> {
        if id.is_null() {
            return Ok("");
        }
        self.ids
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_str())
            .ok_or_else(|| Error::Register(format!("Unknown ID {id}")))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Forbid further registrations.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Enumeration over `u16` naming every registered type. Locks the
    /// register so the enumeration stays valid.
    pub fn enum_type(&mut self) -> DType {
        self.lock();
        self.ids
            .iter()
            .fold(EnumTypeBuilder::new(DType::native_u16()), |b, (name, id)| {
                b.value(name, i64::from(id.0))
            })
            .build()
    }

    /// Read an id stored either as a register enumeration, matched by
    /// name, or as a plain integer.
    pub fn read_id(&self, view: &H5BufferConstView<'_>) -> Result<TypeId> {
        if view.dtype().class() == DTypeClass::Enum {
            let name = enum_name_of_raw(view.dtype(), view.bytes())?;
            self.id_of(name)
        } else {
            view.read::<TypeId>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::H5Buffer;
    use crate::enum_utils::{enum_names, enum_value_of};
    use h5composites_format::vl_data::VlenHeap;

    struct Counter;

    impl HasTypeId for Counter {
        fn type_name() -> &'static str {
            "Counter"
        }
    }

    #[test]
    fn ids_are_sequential() {
        let mut reg = TypeRegister::new();
        assert_eq!(reg.register_type("b").unwrap(), TypeId(0));
        assert_eq!(reg.register::<Counter>().unwrap(), TypeId(1));
        assert_eq!(Counter::registered_id(&reg).unwrap(), TypeId(1));
        assert_eq!(reg.name_of(TypeId(0)).unwrap(), "b");
        assert_eq!(reg.name_of(TypeId::NULL).unwrap(), "");
        assert_eq!(reg.name_of(TypeId(7)).unwrap_err().to_string(), "Unknown ID 7");
        assert_eq!(reg.id_of("x").unwrap_err().to_string(), "Unknown type 'x'");
        assert_eq!(
            reg.register_type("b").unwrap_err().to_string(),
            "Cannot re-register type 'b'!"
        );
    }

    #[test]
    fn enum_type_locks() {
        let mut reg = TypeRegister::new();
        reg.register_type("zeta").unwrap();
        reg.register_type("alpha").unwrap();
        let dtype = reg.enum_type();
        assert!(reg.locked());
        assert_eq!(enum_names(&dtype).unwrap(), ["alpha", "zeta"]);
        assert_eq!(enum_value_of(&dtype, "zeta").unwrap(), 0);
        assert_eq!(
            reg.register_type("late").unwrap_err().to_string(),
            "Cannot modify locked register"
        );
    }

    #[test]
    fn ids_read_by_name() {
        let mut theirs = TypeRegister::new();
        theirs.register_type("x").unwrap();
        theirs.register_type("y").unwrap();
        let dtype = theirs.enum_type();
        let heap = VlenHeap::new();
        let raw = 1u16.to_le_bytes();
        let view = H5BufferConstView::new(&dtype, &raw, &heap).unwrap();

        let mut ours = TypeRegister::new();
        ours.register_type("y").unwrap();
        ours.register_type("x").unwrap();
        assert_eq!(ours.read_id(&view).unwrap(), TypeId(0));

        let mut plain = H5Buffer::new(DType::native_u16());
        plain.view_mut().write(&TypeId(3)).unwrap();
        assert_eq!(ours.read_id(&plain.view()).unwrap(), TypeId(3));
    }
}
