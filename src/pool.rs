//! Shared buffer pool handle passed between connected endpoints.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Allocation requirements of a buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolProperties {
    /// Number of buffers.
    pub buffer_count: usize,
    /// Size of each buffer in bytes.
    pub buffer_size: usize,
    /// Required alignment in bytes.
    pub alignment: usize,
    /// Prefix bytes reserved before each buffer.
    pub prefix: usize,
}

/// Cheap-to-clone handle to a shared buffer pool.
///
/// Clones refer to the same pool; the pool is released once the last
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    id: u64,
    properties: PoolProperties,
}

impl BufferPool {
    /// Creates a new pool with the given properties.
    pub fn new(properties: PoolProperties) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                properties,
            }),
        }
    }

    /// Unique id of the pool (shared by all clones).
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Allocation properties of the pool.
    pub fn properties(&self) -> PoolProperties {
        self.inner.properties
    }

    /// Returns `true` if both handles refer to the same pool.
    pub fn same_pool(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(PoolProperties::default())
    }
}
