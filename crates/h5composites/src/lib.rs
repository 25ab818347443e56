//! Read and write composite Rust types to HDF5 files.
//!
//! This crate maps Rust values onto HDF5 datatypes and moves them through
//! typed buffers, on top of the pure-Rust format layer in
//! `h5composites-format`. It converts between datatypes, finds common
//! types, and merges datasets and whole files.
//!
//! # Writing
//!
//! ```no_run
//! use h5composites::{H5File, TypedWriter};
//!
//! let file = H5File::create("events.h5", true).unwrap();
//! let mut writer = TypedWriter::<(u32, f64)>::new(&file.root(), "hits").unwrap();
//! writer.write(&(1, 0.5)).unwrap();
//! writer.write(&(2, 1.25)).unwrap();
//! ```
//!
//! # Reading
//!
//! ```no_run
//! use h5composites::{H5File, TypedReader};
//!
//! let file = H5File::open("events.h5", false).unwrap();
//! let hits = file.root().dataset("hits").unwrap();
//! for hit in TypedReader::<(u64, f32)>::new(&hits, None).unwrap() {
//!     println!("{:?}", hit.unwrap());
//! }
//! ```
//!
//! # Composite types
//!
//! ```no_run
//! # #[cfg(feature = "derive")]
//! # {
//! use h5composites::{to_buffer, H5Enum, H5Struct};
//!
//! #[derive(H5Enum, Clone, Copy, Debug, PartialEq)]
//! #[repr(u8)]
//! enum Detector {
//!     Tracker,
//!     Calorimeter,
//! }
//!
//! #[derive(H5Struct, Clone, Debug, PartialEq)]
//! struct Hit {
//!     detector: Detector,
//!     #[h5(name = "E")]
//!     energy: f64,
//!     label: String,
//! }
//!
//! let hit = Hit { detector: Detector::Tracker, energy: 3.5, label: "a".into() };
//! let buffer = to_buffer(&hit).unwrap();
//! assert_eq!(buffer.view().read::<Hit>().unwrap(), hit);
//! # }
//! ```

extern crate self as h5composites;

pub mod buffer;
pub mod common_dtype;
pub mod conversion;
pub mod dataset_utils;
pub mod dtype;
pub mod enum_utils;
pub mod error;
pub mod file;
pub mod file_merger;
pub mod group_wrapper;
pub mod iterator;
pub mod merge;
pub mod precision;
pub mod printing;
pub mod reader;
pub mod traits;
pub mod type_register;
pub mod writer;

pub use buffer::{ElementBlock, H5Buffer, H5BufferConstView, H5BufferView};
pub use common_dtype::common_dtype;
pub use conversion::{convert, ConversionCriteria, ConversionStatus};
pub use dtype::{DType, DTypeClass, DTypeExt};
pub use error::{Error, Result};
pub use file::{Attribute, CommittedType, DataSet, Group, H5File, ObjectType};
pub use file_merger::{FileMerger, MergeSettings};
pub use group_wrapper::GroupWrapper;
pub use merge::{BitAnd, BitOr, MergeFactory, Multiplies, Plus};
pub use reader::{Reader, TypedReader};
pub use traits::{
    from_buffer, to_buffer, BufferRead, BufferWrite, FLString, FLVector, H5DType, StaticH5DType,
};
pub use type_register::{HasTypeId, TypeId, TypeRegister};
pub use writer::{TypedWriter, Writer};

#[cfg(feature = "derive")]
pub use h5composites_derive::{H5Enum, H5Struct};

// Re-export the datatype builders for hand-written composite types
pub use h5composites_format::type_builders::{CompoundTypeBuilder, EnumTypeBuilder};
