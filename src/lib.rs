//! Lossless compression of integral greyscale frame streams.
//!
//! Frames of detector counts compress through block-adaptive
//! significant-bits packing into a seekable multi-frame container
//! ([`Terse`]), and decompress bit-exactly ([`Terse::prolix`]). The
//! container serializes behind a small XML-shaped prelude, endianness-
//! independent, and the [`filter`] module exposes the surface HDF5
//! needs to store containers transparently inside datasets.

mod bits;
mod container;
mod decode;
mod encode;
mod error;
mod header;
mod pool;
mod sample;

pub mod filter;

pub use bits::{BitReader, BitWriter};
pub use container::Terse;
pub use error::TrpxError;
pub use pool::{Parallelism, Task, Workers};
pub use sample::{Mode, Sample};
