//! stripestore - Erasure-Coded Striped Block Storage Core
//!
//! The single-node storage core of a distributed file system: Reed-Solomon
//! erasure coding over GF(256), self-verifying 4 KiB blocks with CRC32C
//! checksums, striped placement across volume files, and asynchronous
//! direct I/O through `io_uring`.
//!
//! The crate is organized leaves-first:
//!
//! - [`gf`]: GF(256) arithmetic kernel with SIMD table-lookup bulk operations
//! - [`matrix`]: Vandermonde/Cauchy generator matrices, Gauss-Jordan inversion
//! - [`codec`]: systematic Reed-Solomon encode / decode / generic coding
//! - [`block`]: the 4 KiB block and volume header formats, CRC32C, and the
//!   round-robin spread/unspread interleave
//! - [`aio`]: page-aligned async block I/O (Linux)
//! - [`stripe`]: the write and read paths composed end to end, including
//!   two-phase stripe rewrites with rollback pre-images (Linux)
//!
//! Replication, two-phase commit across nodes, index management, garbage
//! collection, and the RPC transport are collaborators of this crate, not
//! part of it. The core exposes the primitives they need and recovers
//! nothing on its own: every failure is surfaced to the caller.
//!
//! # Example
//!
//! ```rust
//! use stripestore::codec::ReedSolomon;
//!
//! let rs = ReedSolomon::new(4, 2).unwrap();
//!
//! let data: Vec<Vec<u8>> = (0..4u8)
//!     .map(|i| (0..64u8).map(|j| i.wrapping_mul(64).wrapping_add(j)).collect())
//!     .collect();
//! let mut parity = vec![vec![0u8; 64]; 2];
//!
//! {
//!     let data_refs: Vec<&[u8]> = data.iter().map(|d| d.as_slice()).collect();
//!     let mut parity_refs: Vec<&mut [u8]> =
//!         parity.iter_mut().map(|p| p.as_mut_slice()).collect();
//!     rs.encode(&data_refs, &mut parity_refs);
//! }
//!
//! // Lose two data shards, then recover them from the survivors.
//! let mut shards: Vec<Vec<u8>> = data.iter().cloned().chain(parity.iter().cloned()).collect();
//! shards[0].fill(0);
//! shards[2].fill(0);
//! let erasures = [true, false, true, false, false, false];
//!
//! let mut shard_refs: Vec<&mut [u8]> = shards.iter_mut().map(|s| s.as_mut_slice()).collect();
//! rs.decode(&mut shard_refs, &erasures).unwrap();
//!
//! assert_eq!(shards[0], data[0]);
//! assert_eq!(shards[2], data[2]);
//! ```

use thiserror::Error;

pub mod block;
pub mod codec;
pub mod gf;
pub mod matrix;

#[cfg(target_os = "linux")]
pub mod aio;
#[cfg(target_os = "linux")]
pub mod stripe;

pub use block::{crc32c, spread, unspread, Block, VolumeHeader};
pub use codec::ReedSolomon;
pub use matrix::Matrix;

/// Result type alias for storage-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the storage core.
///
/// Every failure mode is surfaced to the caller as one of these kinds; the
/// core never retries, never switches to a spare shard, and never repairs
/// data in place. Contract violations (aliased shard buffers, mismatched
/// shard sizes) are asserts, not errors: the caller could have prevented
/// them.
#[derive(Error, Debug)]
pub enum Error {
    /// Codec constructed with shard counts out of range.
    #[error("invalid shard count: {data} data + {parity} parity shards")]
    InvalidShardCount { data: usize, parity: usize },

    /// Gauss-Jordan elimination hit a singular matrix; decode or generic
    /// coding cannot proceed with this input set.
    #[error("matrix is not invertible")]
    NotInvertible,

    /// Decode called with fewer surviving shards than data shards.
    #[error("insufficient shards: {present} present, {required} required")]
    InsufficientShards { present: usize, required: usize },

    /// `offset_to_block` asked for a shard this volume does not store.
    #[error("shard {shard_id} is not stored on this volume")]
    UnknownShard { shard_id: u8 },

    /// Block checksum or invariant failure.
    #[error("block failed validation")]
    InvalidBlock,

    /// Volume header checksum or invariant failure.
    #[error("volume header failed validation")]
    InvalidHeader,

    /// The kernel rejected an I/O submission.
    #[error("async I/O submission failed")]
    IoSubmit(#[source] std::io::Error),

    /// An in-flight I/O request completed with an error.
    #[error("async I/O completion reported failure")]
    IoComplete(#[source] std::io::Error),
}
