//! Pure-Rust HDF5 binary format support for h5composites.
//!
//! This crate parses and serializes the HDF5 structures h5composites
//! relies on (superblock v2/v3, object headers, links, attributes,
//! contiguous and chunked layouts, global heaps) and loads whole files
//! into an in-memory object tree. It supports `no_std` environments with
//! the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod attribute;
pub mod btree_v1;
pub mod checksum;
pub mod data_layout;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod file_reader;
pub mod file_writer;
pub mod global_heap;
pub mod link_message;
pub mod message_type;
pub mod object_header;
pub mod object_header_writer;
pub mod superblock;
pub mod tree;
pub mod type_builders;
pub mod vl_data;

pub use dataspace::UNLIMITED;
pub use datatype::Datatype;
pub use error::FormatError;
pub use file_reader::read_file;
pub use file_writer::write_file;
pub use tree::{AttributeNode, DatasetNode, GroupNode, Node};
pub use vl_data::VlenHeap;
