// Cache layer - in-memory TTL cache and the storage-backed response cache

pub mod clock;
pub mod persistent;
pub mod storage;
pub mod ttl;

pub use clock::{Clock, SystemClock};
pub use persistent::{CacheRequest, CacheStats, ContentKind, PersistentCache};
pub use storage::{MemoryStorage, SqliteStorage, StorageBackend, StorageError};
pub use ttl::TtlCache;
