//! Concatenating datasets along one axis.

use h5composites_format::UNLIMITED;
use tracing::{debug, info};

use crate::common_dtype::common_dtype;
use crate::dtype::{DType, DTypeExt};
use crate::error::{Error, Result};
use crate::file::{DataSet, Group};

/// Bytes buffered per block when merging unless told otherwise.
pub const DEFAULT_MERGE_BUFFER_SIZE: usize = 10 * 1024;

fn merge_error(msg: &str) -> Error {
    Error::Merge(msg.to_owned())
}

/// Record `axis` as the merge axis, failing if another axis already is.
fn claim_axis(merge_axis: &mut Option<usize>, axis: usize) -> Result<()> {
    match merge_axis {
        Some(existing) if *existing != axis => {
            Err(merge_error("Could not find a single merge axis!"))
        }
        _ => {
            *merge_axis = Some(axis);
            Ok(())
        }
    }
}

/// Merge axis and merged extent of `datasets`.
///
/// The merge axis is the one axis along which the datasets are extendible
/// or differ in length; `default_axis` when there is none.
pub fn merged_dataset_extent(datasets: &[DataSet], default_axis: usize) -> Result<(usize, Vec<u64>)> {
    let Some(first) = datasets.first() else {
        return Err(merge_error("Cannot merge 0 datasets!"));
    };
    let dims = first.dims()?;
    let mut shapes = Vec::with_capacity(datasets.len());
    for ds in datasets {
        let (d, m) = (ds.dims()?, ds.max_dims()?);
        if d.len() != dims.len() {
            return Err(merge_error("Mismatch in number of dataset dimensions"));
        }
        shapes.push((d, m));
    }
    if dims.is_empty() {
        return Err(merge_error("Cannot merge scalar datasets"));
    }
    let mut merge_axis = None;
    for (i, (d, m)) in shapes.iter().enumerate() {
        for axis in 0..dims.len() {
            let differs = d[axis] != m[axis] || (i > 0 && d[axis] != dims[axis]);
            if differs {
                claim_axis(&mut merge_axis, axis)?;
            }
        }
    }
    let axis = merge_axis.unwrap_or(default_axis);
    if axis >= dims.len() {
        return Err(Error::Merge(format!(
            "Merge axis {axis} out of range for rank {}",
            dims.len()
        )));
    }
    let mut merged = dims;
    merged[axis] = shapes.iter().map(|(d, _)| d[axis]).sum();
    Ok((axis, merged))
}

/// Copy `source` into `target` starting at `position` along `axis`,
/// `n_rows_in_buffer` rows at a time. Returns the position after the
/// copied rows.
pub fn extend_dataset(
    target: &DataSet,
    source: &DataSet,
    axis: usize,
    position: u64,
    n_rows_in_buffer: usize,
) -> Result<u64> {
    let source_dims = source.dims()?;
    let mut target_dims = target.dims()?;
    let same_rows = source_dims.len() == target_dims.len()
        && source_dims
            .iter()
            .zip(&target_dims)
            .enumerate()
            .all(|(i, (s, t))| i == axis || s == t);
    if !same_rows || axis >= source_dims.len() {
        return Err(merge_error("Mismatch in dataset dimensions!"));
    }
    let step = n_rows_in_buffer.max(1) as u64;
    let n_source_rows = source_dims[axis];
    let mut source_start = vec![0; source_dims.len()];
    let mut target_start = vec![0; source_dims.len()];
    target_start[axis] = position;
    let mut row = 0;
    while row < n_source_rows {
        let n = step.min(n_source_rows - row);
        let mut count = source_dims.clone();
        count[axis] = n;
        source_start[axis] = row;
        let block = source.read_hyperslab(&source_start, &count)?;
        let end = target_start[axis] + n;
        if target_dims[axis] < end {
            target_dims[axis] = end;
            target.extend(&target_dims)?;
        }
        target.write_block(&target_start, &count, &block)?;
        target_start[axis] = end;
        row += n;
    }
    debug!(
        source = source.path(),
        target = target.path(),
        rows = n_source_rows,
        "extended dataset"
    );
    Ok(target_start[axis])
}

/// Create `name` in `group` holding every dataset concatenated along the
/// merge axis, in the common type of their types. At most
/// `max_buffer_size` bytes are copied at once.
pub fn merge_datasets(
    group: &Group,
    name: &str,
    datasets: &[DataSet],
    max_buffer_size: usize,
    default_axis: usize,
) -> Result<DataSet> {
    let (axis, full_dims) = merged_dataset_extent(datasets, default_axis)?;
    let dtypes = datasets
        .iter()
        .map(DataSet::dtype)
        .collect::<Result<Vec<DType>>>()?;
    let common = common_dtype(&dtypes)?;
    let row_elements: u64 = full_dims
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != axis)
        .map(|(_, d)| *d)
        .product();
    let row_bytes = (row_elements as usize * common.size()).max(1);
    let n_rows_in_buffer = max_buffer_size / row_bytes;
    if n_rows_in_buffer == 0 {
        return Err(merge_error("Not enough space in buffer for a single row!"));
    }
    let mut max_dims = full_dims.clone();
    max_dims[axis] = UNLIMITED;
    let mut chunk = full_dims.clone();
    chunk[axis] = n_rows_in_buffer as u64;
    for c in &mut chunk {
        *c = (*c).max(1);
    }
    info!(name, inputs = datasets.len(), axis, "merging datasets");
    let target = group.create_dataset(name, common, full_dims, Some(max_dims), Some(chunk))?;
    let mut position = 0;
    for ds in datasets {
        position = extend_dataset(&target, ds, axis, position, n_rows_in_buffer)?;
    }
    Ok(target)
}
