//! Persistent state for the harvester: the entry record model and the
//! embedded key-value maps providing deduplication and resumability.

pub mod entry;
pub mod error;
pub mod kv;
pub mod store;

pub use entry::Entry;
pub use error::StoreError;
pub use kv::KvStore;
pub use store::{HarvestStore, PmcOaMap, PmcOaRecord};
