pub mod blob;
pub mod memory;
pub mod postgrest;

pub use blob::{FsBlobStore, HttpBlobStore};
pub use memory::MemoryDocumentStore;
pub use postgrest::PostgrestDocumentStore;
