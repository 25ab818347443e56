//! Merging whole files.
//!
//! Objects of the same name in every input are merged into one object of
//! the output, recursing into groups:
//!
//! * committed datatypes become their common type, and are merged before
//!   anything else in their group;
//! * datasets with extent are concatenated along the merge axis;
//! * scalar datasets are combined with the merge rule of their type id;
//! * dataset attributes must agree across the inputs.
//!
//! ```no_run
//! use h5composites::file_merger::{FileMerger, MergeSettings};
//!
//! let merger = FileMerger::new("merged.h5", &["a.h5", "b.h5"], false).unwrap();
//! merger.merge(&MergeSettings::default()).unwrap();
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use crate::buffer::H5Buffer;
use crate::common_dtype::common_dtype;
use crate::dataset_utils::{merge_datasets, DEFAULT_MERGE_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::file::{DataSet, Group, H5File, ObjectType};
use crate::enum_utils::enum_buffer;
use crate::group_wrapper::{dataset_type_name, GroupWrapper, TYPE_ID_ATTRIBUTE};
use crate::merge::{match_buffers, MergeFactory};
use crate::type_register::{TypeId, TypeRegister};

/// Which kinds of dataset to merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSettings {
    /// Skip datasets with extent.
    pub only_scalars: bool,
    /// Skip scalar datasets.
    pub only_datasets: bool,
}

/// Merges several input files into one output file.
#[derive(Debug)]
pub struct FileMerger {
    output: Group,
    inputs: Vec<Group>,
    buffer_size: usize,
    merge_axis: usize,
    register: TypeRegister,
    factory: MergeFactory,
}

impl FileMerger {
    /// Create the output file and open every input read-only.
    pub fn new<P, Q>(output: P, inputs: &[Q], overwrite: bool) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let inputs = inputs
            .iter()
            .map(|p| Ok(H5File::open(p, false)?.root()))
            .collect::<Result<Vec<_>>>()?;
        let output = H5File::create(output, overwrite)?.root();
        let mut register = TypeRegister::new();
        let factory = MergeFactory::with_defaults(&mut register)?;
        Ok(Self {
            output,
            inputs,
            buffer_size: DEFAULT_MERGE_BUFFER_SIZE,
            merge_axis: 0,
            register,
            factory,
        })
    }

    /// Bytes copied at once when concatenating datasets.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Axis to concatenate along when the datasets do not imply one.
    pub fn with_merge_axis(mut self, merge_axis: usize) -> Self {
        self.merge_axis = merge_axis;
        self
    }

    /// Replace the merge rules. Type ids read from the inputs are looked
    /// up by name in `register`.
    pub fn with_merge_rules(mut self, register: TypeRegister, factory: MergeFactory) -> Self {
        self.register = register;
        self.factory = factory;
        self
    }

    pub fn output(&self) -> &Group {
        &self.output
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn merge_axis(&self) -> usize {
        self.merge_axis
    }

    /// Merge every input into the output and write the output.
    pub fn merge(&self, settings: &MergeSettings) -> Result<()> {
        info!(inputs = self.inputs.len(), output = %self.output.file().path().display(), "merging files");
        self.merge_groups(&self.output, &self.inputs, settings)?;
        self.output.file().flush()
    }

    fn merge_groups(&self, output: &Group, inputs: &[Group], settings: &MergeSettings) -> Result<()> {
        let mut found: BTreeMap<String, (ObjectType, Vec<usize>)> = BTreeMap::new();
        for (index, group) in inputs.iter().enumerate() {
            for name in group.names()? {
                let kind = group.object_type(&name)?;
                let entry = found.entry(name.clone()).or_insert_with(|| (kind, Vec::new()));
                if entry.0 != kind {
                    return Err(Error::Merge(format!(
                        "Mismatch between object types for {name}"
                    )));
                }
                entry.1.push(index);
            }
        }

        // Datatypes first so that they exist before anything using them.
        for (name, (_, sources)) in found.iter().filter(|(_, (k, _))| *k == ObjectType::DataType) {
            info!("Merge data type {}", child_path(output, name));
            let dtypes = sources
                .iter()
                .map(|&i| inputs[i].dtype_named(name)?.dtype())
                .collect::<Result<Vec<_>>>()?;
            output.commit_dtype(name, common_dtype(&dtypes)?)?;
        }

        for (name, (kind, sources)) in &found {
            match kind {
                ObjectType::DataType => {}
                ObjectType::Group => {
                    info!("Merging {}", child_path(output, name));
                    let groups = sources
                        .iter()
                        .map(|&i| inputs[i].group(name))
                        .collect::<Result<Vec<_>>>()?;
                    let merged = output.create_group(name)?;
                    self.merge_groups(&merged, &groups, settings)?;
                }
                ObjectType::Dataset => {
                    info!("Merging {}", child_path(output, name));
                    let datasets = sources
                        .iter()
                        .map(|&i| inputs[i].dataset(name))
                        .collect::<Result<Vec<_>>>()?;
                    let mut scalar = None;
                    for ds in &datasets {
                        let is_scalar = ds.is_scalar()?;
                        if *scalar.get_or_insert(is_scalar) != is_scalar {
                            return Err(Error::Merge("Mismatch in dataset dimensions!".into()));
                        }
                    }
                    if scalar == Some(true) {
                        self.merge_scalars(output, name, &datasets, settings)?;
                    } else {
                        self.merge_datasets(output, name, &datasets, settings)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn merge_scalars(
        &self,
        output: &Group,
        name: &str,
        inputs: &[DataSet],
        settings: &MergeSettings,
    ) -> Result<()> {
        if settings.only_datasets {
            return Ok(());
        }
        let mut rule: Option<String> = None;
        for ds in inputs {
            let type_name = dataset_type_name(ds)?;
            if *rule.get_or_insert_with(|| type_name.clone()) != type_name {
                return Err(Error::Merge("Mismatch in merge rules!".into()));
            }
        }
        let id = match rule.as_deref() {
            None | Some("") => TypeId::NULL,
            Some(type_name) => self.register.id_of(type_name)?,
        };
        let values = inputs
            .iter()
            .map(DataSet::read_scalar)
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = values.iter().map(H5Buffer::view).collect();
        let merged = self.factory.merge(id, &views)?;
        debug!(name, rule = %id, "merged scalar");
        let out = output.create_dataset(name, merged.dtype().clone(), Vec::new(), None, None)?;
        out.write_scalar(&merged.view())?;
        merge_attributes(&out, inputs, &[TYPE_ID_ATTRIBUTE])?;
        // Ids are renumbered in the output register.
        if let Some(type_name) = rule.as_deref().filter(|n| !n.is_empty()) {
            let register = GroupWrapper::type_register(&self.output)?;
            out.set_attribute(TYPE_ID_ATTRIBUTE, &enum_buffer(&register, type_name)?.view())?;
        }
        Ok(())
    }

    fn merge_datasets(
        &self,
        output: &Group,
        name: &str,
        inputs: &[DataSet],
        settings: &MergeSettings,
    ) -> Result<()> {
        if settings.only_scalars {
            return Ok(());
        }
        let out = merge_datasets(output, name, inputs, self.buffer_size, self.merge_axis)?;
        merge_attributes(&out, inputs, &[])
    }
}

fn child_path(group: &Group, name: &str) -> String {
    if group.path().is_empty() {
        name.to_owned()
    } else {
        format!("{}/{name}", group.path())
    }
}

/// Copy the attributes of `inputs` onto `out`, requiring equal values
/// for attributes present in several inputs. Attributes named in `skip`
/// are left to the caller.
fn merge_attributes(out: &DataSet, inputs: &[DataSet], skip: &[&str]) -> Result<()> {
    let mut attributes: BTreeMap<String, H5Buffer> = BTreeMap::new();
    for ds in inputs {
        for name in ds.attribute_names()? {
            if skip.contains(&name.as_str()) {
                continue;
            }
            let value = ds.attribute(&name)?.value()?;
            match attributes.get(&name) {
                Some(existing) => {
                    if !match_buffers(&existing.view(), &value.view())? {
                        return Err(Error::Merge(format!(
                            "Mismatch in values for attribute {name}"
                        )));
                    }
                }
                None => {
                    attributes.insert(name, value);
                }
            }
        }
    }
    for (name, value) in &attributes {
        out.set_attribute(name, &value.view())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use crate::group_wrapper::TYPE_REGISTER_NAME;
    use crate::merge::Plus;
    use crate::traits::to_buffer;
    use std::path::PathBuf;

    fn write_input(dir: &Path, name: &str, count: u32, rows: &[f64], tag: &str) -> PathBuf {
        let path = dir.join(name);
        let mut register = TypeRegister::new();
        MergeFactory::with_defaults(&mut register).unwrap();
        let out = GroupWrapper::create_file(&path, false, &mut register).unwrap();
        out.write_scalar_with_id("count", &Plus(count), &register).unwrap();
        out.write_scalar("tag", tag).unwrap();
        let sub = out.create_group("sub").unwrap();
        {
            let mut writer = sub.make_dataset_writer::<f64>("values", 4).unwrap();
            for row in rows {
                writer.write(row).unwrap();
            }
        }
        let unit = to_buffer("GeV").unwrap();
        sub.group().dataset("values").unwrap().set_attribute("unit", &unit.view()).unwrap();
        out.file().flush().unwrap();
        path
    }

    #[test]
    fn files_merge_object_by_object() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_input(dir.path(), "a.h5", 3, &[1.0, 2.0], "run");
        let b = write_input(dir.path(), "b.h5", 4, &[3.0], "run");
        let out = dir.path().join("out.h5");
        FileMerger::new(&out, &[&a, &b], false)
            .unwrap()
            .merge(&MergeSettings::default())
            .unwrap();

        let merged = GroupWrapper::read_file(&out, false).unwrap();
        assert!(GroupWrapper::has_type_register(merged.group()));
        assert_eq!(merged.read_scalar::<u32>("count").unwrap(), 7);
        assert_eq!(merged.type_name_of("count").unwrap(), "H5Composites::Plus");
        assert_eq!(merged.read_scalar::<String>("tag").unwrap(), "run");
        let values = merged.read_group("sub").unwrap().group().dataset("values").unwrap();
        assert_eq!(values.dims().unwrap(), [3]);
        assert_eq!(values.dtype().unwrap(), DType::native_f64());
        let rows: Vec<f64> = values.read_all().unwrap().iter().map(|v| v.read().unwrap()).collect();
        assert_eq!(rows, [1.0, 2.0, 3.0]);
        assert_eq!(values.attribute("unit").unwrap().read::<String>().unwrap(), "GeV");
    }

    #[test]
    fn type_ids_merge_by_name_across_registers() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_input(dir.path(), "a.h5", 2, &[1.0], "run");
        let b = dir.path().join("b.h5");
        {
            let mut register = TypeRegister::new();
            register.register_type("MyType").unwrap();
            MergeFactory::with_defaults(&mut register).unwrap();
            let out = GroupWrapper::create_file(&b, false, &mut register).unwrap();
            out.write_scalar_with_id("count", &Plus(4u32), &register).unwrap();
            out.write_scalar("tag", "run").unwrap();
            out.file().flush().unwrap();
        }
        let out = dir.path().join("out.h5");
        FileMerger::new(&out, &[&a, &b], false)
            .unwrap()
            .merge(&MergeSettings::default())
            .unwrap();

        let merged = GroupWrapper::read_file(&out, false).unwrap();
        assert_eq!(merged.read_scalar::<u32>("count").unwrap(), 6);
        assert_eq!(merged.type_name_of("count").unwrap(), "H5Composites::Plus");
        let register = GroupWrapper::type_register(merged.group()).unwrap();
        let count = merged.group().dataset("count").unwrap();
        assert_eq!(count.attribute(TYPE_ID_ATTRIBUTE).unwrap().dtype(), &register);
    }

    #[test]
    fn settings_select_what_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_input(dir.path(), "a.h5", 1, &[1.0], "x");
        let scalars = dir.path().join("scalars.h5");
        FileMerger::new(&scalars, &[&a], false)
            .unwrap()
            .merge(&MergeSettings {
                only_scalars: true,
                only_datasets: false,
            })
            .unwrap();
        let root = H5File::open(&scalars, false).unwrap().root();
        assert!(root.contains("count"));
        assert!(root.contains(TYPE_REGISTER_NAME));
        assert!(!root.group("sub").unwrap().contains("values"));

        let datasets = dir.path().join("datasets.h5");
        FileMerger::new(&datasets, &[&a], false)
            .unwrap()
            .merge(&MergeSettings {
                only_scalars: false,
                only_datasets: true,
            })
            .unwrap();
        let root = H5File::open(&datasets, false).unwrap().root();
        assert!(!root.contains("count"));
        assert!(root.group("sub").unwrap().contains("values"));

        assert!(matches!(
            FileMerger::new(&datasets, &[&a], false),
            Err(Error::FileExists(_))
        ));
    }

    #[test]
    fn mismatches_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_input(dir.path(), "a.h5", 1, &[1.0], "x");
        let b = write_input(dir.path(), "b.h5", 1, &[1.0], "y");
        let err = FileMerger::new(dir.path().join("o1.h5"), &[&a, &b], false)
            .unwrap()
            .merge(&MergeSettings::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "Mismatch in merged values");

        let c = dir.path().join("c.h5");
        {
            let file = H5File::create(&c, false).unwrap();
            file.root().create_group("count").unwrap();
        }
        let err = FileMerger::new(dir.path().join("o2.h5"), &[&a, &c], false)
            .unwrap()
            .merge(&MergeSettings::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "Mismatch between object types for count");

        let d = dir.path().join("d.h5");
        {
            let file = H5File::create(&d, false).unwrap();
            let ds = file
                .root()
                .create_dataset("count", DType::native_u32(), Vec::new(), None, None)
                .unwrap();
            ds.write_scalar(&to_buffer(&1u32).unwrap().view()).unwrap();
        }
        let err = FileMerger::new(dir.path().join("o3.h5"), &[&a, &d], false)
            .unwrap()
            .merge(&MergeSettings::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "Mismatch in merge rules!");
    }
}
