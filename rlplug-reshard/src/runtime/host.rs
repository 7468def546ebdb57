use std::sync::{
    Arc, Mutex, PoisonError, Weak,
    atomic::{AtomicU64, Ordering},
};

use rlplug_mesh::{MemoryKind, NamedSharding, ShardingError};
use tracing::debug;

use super::ArrayRuntime;
use crate::model::{DType, ShardedArray, Shardings, State};

#[derive(thiserror::Error, Debug)]
pub enum HostRuntimeError {
    #[error("shape {shape:?} needs {expected} values, got {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("no destination sharding for `{0}`")]
    MissingSharding(String),
    #[error("`{path}`: partition spec of rank {spec_rank} exceeds array rank {array_rank}")]
    RankMismatch {
        path: String,
        spec_rank: usize,
        array_rank: usize,
    },
    #[error("`{path}`: dimension {dim} of size {size} is not divisible into {shards} shards")]
    Indivisible {
        path: String,
        dim: usize,
        size: usize,
        shards: usize,
    },
    #[error("Sharding error: {0}")]
    Sharding(#[from] ShardingError),
}

/// Array held in host memory, tagged with the placement it would have on a
/// real mesh.
#[derive(Debug, Clone)]
pub struct HostArray {
    shape: Vec<usize>,
    dtype: DType,
    sharding: NamedSharding,
    buffer: Arc<Vec<f32>>,
}

impl HostArray {
    pub fn values(&self) -> &[f32] {
        &self.buffer
    }

    /// Whether both arrays are views of the same allocation.
    pub fn shares_buffer(&self, other: &HostArray) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }
}

impl ShardedArray for HostArray {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn sharding(&self) -> &NamedSharding {
        &self.sharding
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// `reshard` calls.
    pub migrations: u64,
    /// Leaves copied by `reshard`.
    pub arrays_moved: u64,
    pub casts: u64,
    /// `put_on_memory_kind` calls.
    pub memory_moves: u64,
    pub reclaims: u64,
    pub reclaimed_buffers: u64,
}

#[derive(Debug, Default)]
struct Counters {
    migrations: AtomicU64,
    arrays_moved: AtomicU64,
    casts: AtomicU64,
    memory_moves: AtomicU64,
    reclaims: AtomicU64,
    reclaimed_buffers: AtomicU64,
}

/// In-process runtime. Every array owns a host buffer; the runtime tracks
/// buffers weakly so `reclaim` can account for the ones that died.
#[derive(Debug, Default)]
pub struct HostRuntime {
    counters: Counters,
    buffers: Mutex<Vec<Weak<Vec<f32>>>>,
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn array(
        &self,
        values: Vec<f32>,
        shape: Vec<usize>,
        dtype: DType,
        sharding: NamedSharding,
    ) -> Result<HostArray, HostRuntimeError> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(HostRuntimeError::ShapeMismatch {
                shape,
                expected,
                actual: values.len(),
            });
        }
        let values = values.into_iter().map(|v| quantize(v, dtype)).collect();
        Ok(HostArray {
            shape,
            dtype,
            sharding,
            buffer: self.allocate(values),
        })
    }

    pub fn stats(&self) -> RuntimeStats {
        let c = &self.counters;
        RuntimeStats {
            migrations: c.migrations.load(Ordering::Relaxed),
            arrays_moved: c.arrays_moved.load(Ordering::Relaxed),
            casts: c.casts.load(Ordering::Relaxed),
            memory_moves: c.memory_moves.load(Ordering::Relaxed),
            reclaims: c.reclaims.load(Ordering::Relaxed),
            reclaimed_buffers: c.reclaimed_buffers.load(Ordering::Relaxed),
        }
    }

    /// Buffers allocated and not yet reclaimed, dead or alive.
    pub fn tracked_buffers(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|b| b.strong_count() > 0)
            .count()
    }

    fn allocate(&self, values: Vec<f32>) -> Arc<Vec<f32>> {
        let buffer = Arc::new(values);
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&buffer));
        buffer
    }

    fn copy_to(&self, array: &HostArray, sharding: NamedSharding) -> HostArray {
        HostArray {
            shape: array.shape.clone(),
            dtype: array.dtype,
            sharding,
            buffer: self.allocate(array.buffer.as_ref().clone()),
        }
    }
}

impl ArrayRuntime for HostRuntime {
    type Array = HostArray;
    type Error = HostRuntimeError;

    fn cast(&self, array: HostArray, dtype: DType) -> Result<HostArray, HostRuntimeError> {
        self.counters.casts.fetch_add(1, Ordering::Relaxed);
        let values = array.buffer.iter().map(|v| quantize(*v, dtype)).collect();
        Ok(HostArray {
            shape: array.shape,
            dtype,
            sharding: array.sharding,
            buffer: self.allocate(values),
        })
    }

    fn reshard(
        &self,
        state: State<HostArray>,
        dst: &Shardings,
    ) -> Result<State<HostArray>, HostRuntimeError> {
        self.counters.migrations.fetch_add(1, Ordering::Relaxed);
        let moved = state.len() as u64;
        let out = state.try_map(|path, array| {
            let target = dst
                .get(path)
                .ok_or_else(|| HostRuntimeError::MissingSharding(path.to_string()))?;
            check_layout(path, &array, target)?;
            Ok::<_, HostRuntimeError>(self.copy_to(&array, target.clone()))
        })?;
        self.counters.arrays_moved.fetch_add(moved, Ordering::Relaxed);
        debug!("resharded {} arrays", moved);
        Ok(out)
    }

    fn put_on_memory_kind(
        &self,
        state: State<HostArray>,
        kind: MemoryKind,
    ) -> Result<State<HostArray>, HostRuntimeError> {
        self.counters.memory_moves.fetch_add(1, Ordering::Relaxed);
        state.try_map(|_, array| {
            let sharding = array.sharding.with_memory_kind(kind);
            Ok(self.copy_to(&array, sharding))
        })
    }

    fn reclaim(&self) -> usize {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = buffers.len();
        buffers.retain(|b| b.strong_count() > 0);
        let freed = before - buffers.len();
        self.counters.reclaims.fetch_add(1, Ordering::Relaxed);
        self.counters
            .reclaimed_buffers
            .fetch_add(freed as u64, Ordering::Relaxed);
        freed
    }
}

fn check_layout(
    path: &str,
    array: &HostArray,
    target: &NamedSharding,
) -> Result<(), HostRuntimeError> {
    let spec_rank = target.spec().rank();
    if spec_rank > array.shape.len() {
        return Err(HostRuntimeError::RankMismatch {
            path: path.to_string(),
            spec_rank,
            array_rank: array.shape.len(),
        });
    }
    for (dim, size) in array.shape.iter().enumerate() {
        let shards = target.shard_count(dim);
        if size % shards != 0 {
            return Err(HostRuntimeError::Indivisible {
                path: path.to_string(),
                dim,
                size: *size,
                shards,
            });
        }
    }
    Ok(())
}

/// Rounds `v` to the precision of `dtype`, round-to-nearest-even on the
/// mantissa for the 16-bit floats.
fn quantize(v: f32, dtype: DType) -> f32 {
    match dtype {
        DType::F32 => v,
        DType::I32 => v.round(),
        DType::Bf16 => round_mantissa(v, 7),
        DType::F16 => round_mantissa(v, 10),
    }
}

fn round_mantissa(v: f32, keep_bits: u32) -> f32 {
    if !v.is_finite() {
        return v;
    }
    let drop = 23 - keep_bits;
    let bits = v.to_bits();
    let bias = (1u32 << (drop - 1)) - 1 + ((bits >> drop) & 1);
    f32::from_bits(bits.wrapping_add(bias) & !((1u32 << drop) - 1))
}
