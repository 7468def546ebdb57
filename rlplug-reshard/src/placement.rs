use std::sync::Arc;

use rlplug_mesh::{
    DeviceMesh, LogicalAxisRules, MemoryKind, NamedSharding, ShardingError, equivalent,
};
use tracing::{debug, info};

use crate::{
    cluster::RlCluster,
    error::PlacementError,
    model::{DType, Module, ShardedArray, Shardings, State},
    resolver::resolve_axis_rules,
    runtime::ArrayRuntime,
};

/// Destination sharding of every leaf on `mesh`: the leaf's annotation
/// translated through `rules`, replicated where it has none. Mesh axes that
/// `mesh` does not have are replicated too, so rules written for another
/// role's mesh still apply.
pub fn destination_shardings<A>(
    state: &State<A>,
    mesh: &Arc<DeviceMesh>,
    rules: Option<&LogicalAxisRules>,
    memory_kind: MemoryKind,
) -> Result<Shardings, ShardingError> {
    state
        .partition_specs(rules)
        .into_iter()
        .map(|(path, spec)| {
            let sharding =
                NamedSharding::new(mesh.clone(), spec.fit_to_mesh(mesh), memory_kind)?;
            Ok((path, sharding))
        })
        .collect()
}

/// Moves `model` onto `mesh` when it lives on a different one, then offloads
/// it to pinned host memory if the cluster asks for it.
///
/// A model counts as on device when any of its leaves sits in the cluster's
/// default memory kind; migrated leaves land there in that case and in
/// pinned host memory otherwise. With `dtype` set, differing leaves are cast
/// before migration. Buffers released by the migration are reclaimed before
/// returning.
pub fn place<R, M>(
    cluster: &RlCluster<R>,
    model: M,
    mesh: &Arc<DeviceMesh>,
    dtype: Option<DType>,
) -> Result<M, PlacementError>
where
    R: ArrayRuntime,
    M: Module<Array = R::Array>,
{
    let runtime = cluster.runtime();
    let default_kind = cluster.default_memory_kind();

    let src_mesh = match model.state().mesh_info() {
        Ok(src) => src,
        Err(e) => {
            debug!("source mesh unknown: {}", e);
            None
        }
    };
    let is_on_device = model.state().any_in_memory(default_kind);
    let needs_migration = !mesh.is_empty()
        && !src_mesh
            .as_deref()
            .is_some_and(|src| equivalent(src, &**mesh));

    let mut model = model;
    if needs_migration {
        let rules = resolve_axis_rules(cluster, mesh);
        let (graph, state) = model.split();
        let memory_kind = if is_on_device {
            default_kind
        } else {
            MemoryKind::PinnedHost
        };
        let dst = destination_shardings(&state, mesh, rules.as_ref(), memory_kind)?;

        let state = match dtype {
            Some(dtype) => state
                .try_map(|path, array| {
                    if array.dtype() == dtype {
                        Ok(array)
                    } else {
                        debug!("cast `{}` from {} to {}", path, array.dtype(), dtype);
                        runtime.cast(array, dtype)
                    }
                })
                .map_err(PlacementError::runtime)?,
            None => state,
        };
        let leaves = state.len();
        let bytes = state.size_in_bytes();
        let state = runtime
            .reshard(state, &dst)
            .map_err(PlacementError::runtime)?;
        model = M::merge(graph, state);

        let freed = runtime.reclaim();
        info!(
            "migrated {} leaves ({} bytes) onto mesh {:?} ({}), reclaimed {} buffers",
            leaves,
            bytes,
            mesh.axis_names(),
            memory_kind,
            freed
        );
    } else {
        debug!("model already on mesh {:?}", mesh.axis_names());
    }

    if is_on_device && cluster.offload_to_cpu() {
        let (graph, state) = model.split();
        let state = runtime
            .put_on_memory_kind(state, MemoryKind::PinnedHost)
            .map_err(PlacementError::runtime)?;
        model = M::merge(graph, state);
        info!("offloaded model to {}", MemoryKind::PinnedHost);
    }
    Ok(model)
}
