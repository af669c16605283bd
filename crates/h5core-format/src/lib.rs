//! On-disk message codecs for the h5core dataset engine.
//!
//! Every structure here is a plain value type with `decode` / `encode`
//! functions over byte slices. Nothing in this crate performs I/O; the
//! engine in `h5core` reads bytes through a file driver and hands them
//! to these codecs.
//!
//! The crate builds without `std` (with `alloc`) so the codecs can be
//! reused in constrained environments.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod btree_v1;
pub mod checksum;
pub mod codec;
pub mod data_layout;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod external_file_list;
pub mod fill_value;
pub mod filter_pipeline;
pub mod fixed_array;
pub mod global_heap;
pub mod link;
pub mod local_heap;
pub mod message_type;
pub mod modification_time;
pub mod object_header;
pub mod selection;
pub mod superblock;
pub mod vds;

pub use error::FormatError;

/// Width in bytes of file addresses written by this crate.
pub const OFFSET_SIZE: u8 = 8;
/// Width in bytes of lengths written by this crate.
pub const LENGTH_SIZE: u8 = 8;
