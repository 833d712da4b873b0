//! Content-addressed storage (§4.A, §4.B).

mod bloom;
mod chunker;
mod hash;
mod store;

pub use bloom::BloomFilter;
pub use hash::{ContentHash, EMPTY_HASH};
pub use store::{BlobMeta, CasStore};
