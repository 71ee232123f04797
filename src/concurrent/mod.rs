//! Worker pooling and crash recovery.

pub mod decorator;
pub mod pool;

pub use decorator::ResourceDecorator;
pub use pool::{Pool, PoolError, PooledWorker, Resource, ResourceFactory};
