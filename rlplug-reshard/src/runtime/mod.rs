mod host;

use std::error::Error;

use rlplug_mesh::MemoryKind;

pub use host::{HostArray, HostRuntime, HostRuntimeError, RuntimeStats};

use crate::model::{DType, ShardedArray, Shardings, State};

/// The distributed-array runtime placement delegates data movement to.
///
/// Every call consumes its input and returns new arrays; sources become
/// unreferenced once the call returns.
pub trait ArrayRuntime {
    type Array: ShardedArray;
    type Error: Error + Send + Sync + 'static;

    /// Converts one array to `dtype` in place on its current sharding.
    fn cast(&self, array: Self::Array, dtype: DType) -> Result<Self::Array, Self::Error>;

    /// Re-lays out every leaf of `state` onto the sharding at the same path
    /// in `dst`. Leaves may come from mixed memory kinds.
    fn reshard(
        &self,
        state: State<Self::Array>,
        dst: &Shardings,
    ) -> Result<State<Self::Array>, Self::Error>;

    /// Moves every leaf to `kind`, keeping mesh and layout.
    fn put_on_memory_kind(
        &self,
        state: State<Self::Array>,
        kind: MemoryKind,
    ) -> Result<State<Self::Array>, Self::Error>;

    /// Frees device memory no longer referenced by any array, synchronously.
    /// Returns the number of buffers released.
    fn reclaim(&self) -> usize;
}
