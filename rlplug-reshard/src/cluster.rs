use std::{collections::BTreeMap, error::Error, sync::Arc};

use rlplug_config::{AdapterRegistry, ConfigError, ConfigSchema, Kwargs, registry};
use rlplug_mesh::{DeviceMesh, MemoryKind, equivalent};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::PlacementError,
    model::{DType, Module},
    placement,
    resolver::RoleAxisRules,
    role::Role,
    runtime::ArrayRuntime,
};

/// Cluster layout: which mesh each role runs on and where parameters rest
/// between steps.
///
/// Frozen schema: kwargs kept aside by an adapter go to the registry's side
/// table, keyed by the `Arc` returned from [`ClusterConfig::from_kwargs`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub role_to_mesh: BTreeMap<Role, Arc<DeviceMesh>>,
    #[serde(default = "default_rollout_engine")]
    pub rollout_engine: String,
    #[serde(default)]
    pub offload_to_cpu: bool,
    #[serde(default)]
    pub default_memory_kind: MemoryKind,
}

fn default_rollout_engine() -> String {
    "vanilla".to_string()
}

impl ConfigSchema for ClusterConfig {}

impl ClusterConfig {
    pub fn from_kwargs(kwargs: Kwargs) -> Result<Arc<Self>, ConfigError> {
        registry().construct::<Self>(kwargs)
    }
}

/// Where a model handed to [`RlCluster::load_model`] comes from.
#[derive(Debug)]
pub enum ModelSource<M> {
    /// An in-memory model, placed by this crate.
    Module(M),
    /// Anything else (a checkpoint path, a hub id); handed to the loader.
    Reference(String),
}

/// Loader for sources that are not in-memory models.
pub trait ModelLoader<M> {
    type Error: Error + Send + Sync + 'static;

    fn load(
        &self,
        reference: &str,
        mesh: &Arc<DeviceMesh>,
        dtype: Option<DType>,
    ) -> Result<M, Self::Error>;
}

pub struct RlCluster<R> {
    cluster_config: Arc<ClusterConfig>,
    r2m: BTreeMap<Role, Arc<DeviceMesh>>,
    runtime: R,
    registry: &'static AdapterRegistry,
}

impl<R> RlCluster<R> {
    pub fn new(cluster_config: Arc<ClusterConfig>, runtime: R) -> Self {
        Self::with_registry(cluster_config, runtime, registry())
    }

    /// Roles whose meshes are equal by value end up sharing one mesh, so a
    /// colocated layout described twice still resolves to a single mesh.
    pub fn with_registry(
        cluster_config: Arc<ClusterConfig>,
        runtime: R,
        registry: &'static AdapterRegistry,
    ) -> Self {
        let mut r2m: BTreeMap<Role, Arc<DeviceMesh>> = BTreeMap::new();
        for (role, mesh) in &cluster_config.role_to_mesh {
            let shared = r2m
                .values()
                .find(|m| equivalent(&***m, &**mesh))
                .cloned();
            let mesh = match shared {
                Some(m) => {
                    debug!("role {} shares an existing mesh", role);
                    m
                }
                None => mesh.clone(),
            };
            r2m.insert(*role, mesh);
        }
        info!(
            "cluster with roles {:?}, offload_to_cpu={}, default memory kind {}",
            r2m.keys().collect::<Vec<_>>(),
            cluster_config.offload_to_cpu,
            cluster_config.default_memory_kind
        );
        Self {
            cluster_config,
            r2m,
            runtime,
            registry,
        }
    }

    pub fn cluster_config(&self) -> &Arc<ClusterConfig> {
        &self.cluster_config
    }

    pub fn mesh(&self, role: Role) -> Option<&Arc<DeviceMesh>> {
        self.r2m.get(&role)
    }

    pub fn r2m(&self) -> &BTreeMap<Role, Arc<DeviceMesh>> {
        &self.r2m
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn default_memory_kind(&self) -> MemoryKind {
        self.cluster_config.default_memory_kind
    }

    pub fn offload_to_cpu(&self) -> bool {
        self.cluster_config.offload_to_cpu
    }

    /// Per-role axis rules recorded alongside the cluster config.
    pub fn role_axis_rules(&self) -> RoleAxisRules {
        let extra = self.registry.extra_fields(&self.cluster_config);
        RoleAxisRules::from_extra_fields(extra.as_ref())
    }
}

impl<R: ArrayRuntime> RlCluster<R> {
    /// Places an in-memory model onto `mesh`, or delegates anything else to
    /// `loader`.
    pub fn load_model<M, L>(
        &self,
        source: ModelSource<M>,
        mesh: &Arc<DeviceMesh>,
        dtype: Option<DType>,
        loader: &L,
    ) -> Result<M, PlacementError>
    where
        M: Module<Array = R::Array>,
        L: ModelLoader<M>,
    {
        match source {
            ModelSource::Module(model) => placement::place(self, model, mesh, dtype),
            ModelSource::Reference(reference) => {
                debug!("delegate loading `{}` to loader", reference);
                loader
                    .load(&reference, mesh, dtype)
                    .map_err(PlacementError::load)
            }
        }
    }
}
