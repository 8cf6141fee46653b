//! Storage layer for Vizreg.
//!
//! Two substrates back the run/test lifecycle:
//! - **Metadata store**: keyed JSON documents, sets, atomic counters and pub/sub
//! - **Blob store**: baseline, current and diff images as whole files

mod blob;
mod jsonl;
mod traits;

pub use blob::FsBlobStore;
pub use jsonl::{DEFAULT_CHANNEL_CAPACITY, JsonlStore};
pub use traits::{Batch, BlobStore, MetadataStore, Op, get_record};
