//! Record store backends.
//!
//! - [`memory`]: `DashMap`-backed store for single-process deployments and tests
//! - [`redis`]: Redis hashes/sets/lists with Lua scripts for atomic updates

pub mod traits;
pub mod memory;
pub mod redis;

pub use traits::{RecordStore, StorageError, ViewCounters, ViewerInsert};
pub use memory::InMemoryRecordStore;
pub use self::redis::RedisRecordStore;
