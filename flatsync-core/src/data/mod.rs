//! Remote access and the local flat-file cache

pub mod cache;
pub mod circuit_breaker;
pub mod memory;
pub mod remote;
pub mod s3;
pub mod sigv4;

pub use cache::{CacheError, CacheMeta, CacheStatus, FlatFileCache, SlotState};
pub use circuit_breaker::CircuitBreaker;
pub use memory::MemoryRemote;
pub use remote::{RemoteError, RemoteHead, RemoteObject, RemoteStore};
pub use s3::S3FlatFiles;
pub use sigv4::SigV4Signer;
