//! Convenience layer over a group: scalars, writers and type ids.
//!
//! Files created through [`GroupWrapper::create_file`] carry the type
//! register as the committed enumeration "TypeRegister" in their root
//! group. Scalars written with [`GroupWrapper::write_scalar_with_id`]
//! record their type in a "typeID" attribute of that enumeration.

use std::path::Path;

use crate::buffer::{H5Buffer, H5BufferConstView};
use crate::dtype::DType;
use crate::enum_utils::{enum_buffer, enum_name_of, enum_name_of_raw};
use crate::error::{Error, Result};
use crate::file::{DataSet, Group, H5File, ObjectType};
use crate::traits::{to_buffer, BufferRead, BufferWrite, StaticH5DType};
use crate::type_register::{HasTypeId, TypeId, TypeRegister};
use crate::writer::{TypedWriter, Writer};

/// Name of the committed register enumeration.
pub const TYPE_REGISTER_NAME: &str = "TypeRegister";
/// Attribute holding the type id of a scalar.
pub const TYPE_ID_ATTRIBUTE: &str = "typeID";

#[derive(Debug, Clone)]
pub struct GroupWrapper {
    group: Group,
    register_type: Option<DType>,
}

impl GroupWrapper {
    /// Wrap `group`, picking up the register of its file.
    pub fn new(group: Group) -> Self {
        let register_type = Self::type_register(&group.file().root()).ok();
        Self {
            group,
            register_type,
        }
    }

    pub fn read_file<P: AsRef<Path>>(path: P, update: bool) -> Result<Self> {
        Ok(Self::new(H5File::open(path, update)?.root()))
    }

    /// Create a file holding the (now locked) register.
    pub fn create_file<P: AsRef<Path>>(
        path: P,
        overwrite: bool,
        register: &mut TypeRegister,
    ) -> Result<Self> {
        let root = H5File::create(path, overwrite)?.root();
        let register_type = register.enum_type();
        root.commit_dtype(TYPE_REGISTER_NAME, register_type.clone())?;
        Ok(Self {
            group: root,
            register_type: Some(register_type),
        })
    }

    pub fn has_type_register(group: &Group) -> bool {
        matches!(
            group.object_type(TYPE_REGISTER_NAME),
            Ok(ObjectType::DataType)
        )
    }

    /// The register enumeration stored in `group`.
    pub fn type_register(group: &Group) -> Result<DType> {
        group.dtype_named(TYPE_REGISTER_NAME)?.dtype()
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn file(&self) -> H5File {
        self.group.file()
    }

    pub fn read_group(&self, name: &str) -> Result<GroupWrapper> {
        Ok(Self {
            group: self.group.group(name)?,
            register_type: self.register_type.clone(),
        })
    }

    pub fn create_group(&self, name: &str) -> Result<GroupWrapper> {
        Ok(Self {
            group: self.group.create_group(name)?,
            register_type: self.register_type.clone(),
        })
    }

    /// Number of objects in the group.
    pub fn len(&self) -> Result<usize> {
        self.group.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.group.is_empty()
    }

    pub fn is_scalar(&self, name: &str) -> Result<bool> {
        self.group.dataset(name)?.is_scalar()
    }

    pub fn read_scalar_buffer(&self, name: &str) -> Result<H5Buffer> {
        self.group.dataset(name)?.read_scalar()
    }

    pub fn read_scalar<T: BufferRead>(&self, name: &str) -> Result<T> {
        self.read_scalar_buffer(name)?.view().read()
    }

    /// Store a buffer as a new scalar dataset.
    pub fn write_scalar_buffer(&self, name: &str, value: &H5BufferConstView<'_>) -> Result<DataSet> {
        let ds = self
            .group
            .create_dataset(name, value.dtype().clone(), Vec::new(), None, None)?;
        ds.write_scalar(value)?;
        Ok(ds)
    }

    pub fn write_scalar<T: BufferWrite + ?Sized>(&self, name: &str, value: &T) -> Result<DataSet> {
        self.write_scalar_buffer(name, &to_buffer(value)?.view())
    }

    /// Store a scalar along with the register id of its type.
    pub fn write_scalar_with_id<T: BufferWrite + HasTypeId>(
        &self,
        name: &str,
        value: &T,
        register: &TypeRegister,
    ) -> Result<DataSet> {
        let id = T::registered_id(register)?;
        let ds = self.write_scalar(name, value)?;
        self.set_type_id(&ds, id)?;
        Ok(ds)
    }

    /// Tag `dataset` with `id` as a value of the register enumeration.
    pub fn set_type_id(&self, dataset: &DataSet, id: TypeId) -> Result<()> {
        let register_type = self.register_type.as_ref().ok_or_else(|| {
            Error::Register("The file holds no type register".into())
        })?;
        let name = enum_name_of(register_type, i64::from(id.0))?;
        let value = enum_buffer(register_type, name)?;
        dataset.set_attribute(TYPE_ID_ATTRIBUTE, &value.view())
    }

    pub fn make_dataset_writer<T: StaticH5DType + BufferWrite>(
        &self,
        name: &str,
        cache_size: usize,
    ) -> Result<TypedWriter<T>> {
        TypedWriter::with_cache_size(&self.group, name, cache_size)
    }

    pub fn make_untyped_writer(
        &self,
        name: &str,
        dtype: DType,
        cache_size: usize,
        chunk_size: Option<usize>,
    ) -> Result<Writer> {
        Writer::with_sizes(&self.group, name, dtype, cache_size, chunk_size)
    }

    /// Registered type name of the dataset `name`; empty when untagged.
    pub fn type_name_of(&self, name: &str) -> Result<String> {
        dataset_type_name(&self.group.dataset(name)?)
    }

    /// Id of the dataset's type in `register`; [`TypeId::NULL`] when
    /// untagged.
    pub fn type_id_of(&self, name: &str, register: &TypeRegister) -> Result<TypeId> {
        let ds = self.group.dataset(name)?;
        if !ds.has_attribute(TYPE_ID_ATTRIBUTE) {
            return Ok(TypeId::NULL);
        }
        let value = ds.attribute(TYPE_ID_ATTRIBUTE)?.value()?;
        register.read_id(&value.view())
    }
}

/// Registered type name recorded on `dataset`; empty when untagged.
pub fn dataset_type_name(dataset: &DataSet) -> Result<String> {
    if !dataset.has_attribute(TYPE_ID_ATTRIBUTE) {
        return Ok(String::new());
    }
    let attr = dataset.attribute(TYPE_ID_ATTRIBUTE)?;
    let value = attr.value()?;
    Ok(enum_name_of_raw(attr.dtype(), value.bytes())?.to_owned())
}
