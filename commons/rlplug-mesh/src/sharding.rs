use std::{collections::HashSet, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{error::ShardingError, mesh::DeviceMesh};

/// Memory tier an array lives in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    #[default]
    Device,
    PinnedHost,
    UnpinnedHost,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Device => "device",
            MemoryKind::PinnedHost => "pinned_host",
            MemoryKind::UnpinnedHost => "unpinned_host",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "device" => Ok(MemoryKind::Device),
            "pinned_host" => Ok(MemoryKind::PinnedHost),
            "unpinned_host" => Ok(MemoryKind::UnpinnedHost),
            other => Err(format!("unknown memory kind `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum AxisNames {
    One(String),
    Many(Vec<String>),
}

/// How one array dimension is laid out over the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<AxisNames>", into = "Option<AxisNames>")]
pub enum PartitionDim {
    Replicated,
    Sharded(Vec<String>),
}

impl PartitionDim {
    pub fn sharded<N: Into<String>>(axis: N) -> Self {
        PartitionDim::Sharded(vec![axis.into()])
    }

    pub fn sharded_by<I, N>(axes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        PartitionDim::Sharded(axes.into_iter().map(Into::into).collect())
    }

    pub fn mesh_axes(&self) -> &[String] {
        match self {
            PartitionDim::Replicated => &[],
            PartitionDim::Sharded(axes) => axes,
        }
    }
}

impl From<Option<AxisNames>> for PartitionDim {
    fn from(value: Option<AxisNames>) -> Self {
        match value {
            None => PartitionDim::Replicated,
            Some(AxisNames::One(axis)) => PartitionDim::Sharded(vec![axis]),
            Some(AxisNames::Many(axes)) if axes.is_empty() => {
                PartitionDim::Replicated
            }
            Some(AxisNames::Many(axes)) => PartitionDim::Sharded(axes),
        }
    }
}

impl From<PartitionDim> for Option<AxisNames> {
    fn from(value: PartitionDim) -> Self {
        match value {
            PartitionDim::Replicated => None,
            PartitionDim::Sharded(mut axes) if axes.len() == 1 => {
                axes.pop().map(AxisNames::One)
            }
            PartitionDim::Sharded(axes) => Some(AxisNames::Many(axes)),
        }
    }
}

/// Per-dimension layout of an array. Trailing dimensions not listed are
/// replicated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionSpec(Vec<PartitionDim>);

impl PartitionSpec {
    pub fn new(dims: Vec<PartitionDim>) -> Self {
        Self(dims)
    }

    pub fn replicated() -> Self {
        Self(Vec::new())
    }

    pub fn dims(&self) -> &[PartitionDim] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn is_replicated(&self) -> bool {
        self.0.iter().all(|d| matches!(d, PartitionDim::Replicated))
    }

    /// Restricts the spec to what `mesh` can express: axes the mesh lacks,
    /// and axes already taken by an earlier dimension, are dropped. A
    /// dimension left without axes is replicated.
    pub fn fit_to_mesh(&self, mesh: &DeviceMesh) -> Self {
        let mut used = HashSet::new();
        Self(
            self.0
                .iter()
                .map(|dim| {
                    let axes: Vec<String> = dim
                        .mesh_axes()
                        .iter()
                        .filter(|a| mesh.axis_size(a).is_some() && used.insert(a.as_str()))
                        .cloned()
                        .collect();
                    if axes.is_empty() {
                        PartitionDim::Replicated
                    } else {
                        PartitionDim::Sharded(axes)
                    }
                })
                .collect(),
        )
    }

    /// Builds a spec by using annotation names directly as mesh axes.
    pub fn from_names(names: &[Option<String>]) -> Self {
        Self(
            names
                .iter()
                .map(|n| match n {
                    Some(axis) => PartitionDim::sharded(axis.clone()),
                    None => PartitionDim::Replicated,
                })
                .collect(),
        )
    }
}

/// Placement of an array: mesh, per-dimension layout and memory tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedSharding {
    mesh: Arc<DeviceMesh>,
    spec: PartitionSpec,
    memory_kind: MemoryKind,
}

impl NamedSharding {
    pub fn new(
        mesh: Arc<DeviceMesh>,
        spec: PartitionSpec,
        memory_kind: MemoryKind,
    ) -> Result<Self, ShardingError> {
        let mut used = HashSet::new();
        for dim in spec.dims() {
            for axis in dim.mesh_axes() {
                if mesh.axis_size(axis).is_none() {
                    return Err(ShardingError::UnknownAxis(axis.clone()));
                }
                if !used.insert(axis.as_str()) {
                    return Err(ShardingError::AxisReused(axis.clone()));
                }
            }
        }
        Ok(Self {
            mesh,
            spec,
            memory_kind,
        })
    }

    /// Fully replicated placement on `mesh`.
    pub fn replicated(mesh: Arc<DeviceMesh>, memory_kind: MemoryKind) -> Self {
        Self {
            mesh,
            spec: PartitionSpec::replicated(),
            memory_kind,
        }
    }

    pub fn mesh(&self) -> &Arc<DeviceMesh> {
        &self.mesh
    }

    pub fn spec(&self) -> &PartitionSpec {
        &self.spec
    }

    pub fn memory_kind(&self) -> MemoryKind {
        self.memory_kind
    }

    /// Same layout on another memory tier.
    pub fn with_memory_kind(&self, memory_kind: MemoryKind) -> Self {
        Self {
            mesh: self.mesh.clone(),
            spec: self.spec.clone(),
            memory_kind,
        }
    }

    /// Number of shards dimension `dim` is split into.
    pub fn shard_count(&self, dim: usize) -> usize {
        self.spec
            .dims()
            .get(dim)
            .map(|d| {
                d.mesh_axes()
                    .iter()
                    .filter_map(|a| self.mesh.axis_size(a))
                    .product()
            })
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::DeviceId;

    fn mesh() -> Arc<DeviceMesh> {
        Arc::new(
            DeviceMesh::new(
                vec![("fsdp", 2), ("tensor", 4)],
                (0..8).map(DeviceId).collect(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_spec_serde() {
        let spec: PartitionSpec = serde_json::from_value(serde_json::json!([
            "fsdp",
            null,
            ["fsdp", "tensor"]
        ]))
        .unwrap();
        assert_eq!(
            spec.dims(),
            &[
                PartitionDim::sharded("fsdp"),
                PartitionDim::Replicated,
                PartitionDim::sharded_by(["fsdp", "tensor"]),
            ]
        );
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            serde_json::json!(["fsdp", null, ["fsdp", "tensor"]])
        );
    }

    #[test]
    fn test_named_sharding_validation() {
        let spec = PartitionSpec::new(vec![
            PartitionDim::sharded("fsdp"),
            PartitionDim::sharded("tensor"),
        ]);
        let sharding =
            NamedSharding::new(mesh(), spec, MemoryKind::Device).unwrap();
        assert_eq!(sharding.shard_count(0), 2);
        assert_eq!(sharding.shard_count(1), 4);
        assert_eq!(sharding.shard_count(2), 1);

        let unknown = PartitionSpec::new(vec![PartitionDim::sharded("expert")]);
        assert_eq!(
            NamedSharding::new(mesh(), unknown, MemoryKind::Device),
            Err(ShardingError::UnknownAxis("expert".into()))
        );

        let reused = PartitionSpec::new(vec![
            PartitionDim::sharded("fsdp"),
            PartitionDim::sharded_by(["tensor", "fsdp"]),
        ]);
        assert_eq!(
            NamedSharding::new(mesh(), reused, MemoryKind::Device),
            Err(ShardingError::AxisReused("fsdp".into()))
        );
    }

    #[test]
    fn test_fit_to_mesh() {
        let spec = PartitionSpec::new(vec![
            PartitionDim::sharded("vocab"),
            PartitionDim::sharded_by(["fsdp", "expert"]),
            PartitionDim::sharded_by(["fsdp", "tensor"]),
            PartitionDim::Replicated,
        ]);
        let fitted = spec.fit_to_mesh(&mesh());
        assert_eq!(
            fitted.dims(),
            &[
                PartitionDim::Replicated,
                PartitionDim::sharded("fsdp"),
                PartitionDim::sharded("tensor"),
                PartitionDim::Replicated,
            ]
        );
        assert!(NamedSharding::new(mesh(), fitted, MemoryKind::Device).is_ok());
        assert!(
            PartitionSpec::from_names(&[Some("vocab".into()), None])
                .fit_to_mesh(&mesh())
                .is_replicated()
        );
    }

    #[test]
    fn test_memory_kind_tokens() {
        assert_eq!("pinned_host".parse::<MemoryKind>(), Ok(MemoryKind::PinnedHost));
        assert_eq!(MemoryKind::Device.to_string(), "device");
        assert!("hbm".parse::<MemoryKind>().is_err());
        let kind: MemoryKind =
            serde_json::from_value(serde_json::json!("unpinned_host")).unwrap();
        assert_eq!(kind, MemoryKind::UnpinnedHost);
    }
}
