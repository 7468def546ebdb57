use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

use crate::error::ShardingError;

/// Global identity of a compute device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serialized form of a mesh: `{"axes": [["data", 2], ["model", 4]], "devices": [0, 1, ...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MeshLayout {
    #[serde(default)]
    axes: Vec<(String, usize)>,
    #[serde(default)]
    devices: Vec<DeviceId>,
}

/// Named, shaped arrangement of devices. Devices are stored flattened in
/// row-major order over the axes.
///
/// A mesh with no axes is the degenerate "empty" mesh, meaning "no
/// distributed placement".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MeshLayout", into = "MeshLayout")]
pub struct DeviceMesh {
    axis_names: Vec<String>,
    shape: Vec<usize>,
    devices: Vec<DeviceId>,
}

impl DeviceMesh {
    pub fn new<N: Into<String>>(
        axes: Vec<(N, usize)>,
        devices: Vec<DeviceId>,
    ) -> Result<Self, ShardingError> {
        let (axis_names, shape): (Vec<String>, Vec<usize>) = axes
            .into_iter()
            .map(|(name, size)| (name.into(), size))
            .unzip();
        validate_axes(&axis_names, &shape)?;

        let expected: usize = shape.iter().product();
        if axis_names.is_empty() {
            if !devices.is_empty() {
                return Err(ShardingError::DeviceCountMismatch {
                    expected: 0,
                    actual: devices.len(),
                });
            }
        } else if expected != devices.len() {
            return Err(ShardingError::DeviceCountMismatch {
                expected,
                actual: devices.len(),
            });
        }

        let mut seen = HashSet::with_capacity(devices.len());
        for id in &devices {
            if !seen.insert(*id) {
                return Err(ShardingError::DuplicateDevice(*id));
            }
        }

        Ok(Self {
            axis_names,
            shape,
            devices,
        })
    }

    pub fn empty() -> Self {
        Self {
            axis_names: Vec::new(),
            shape: Vec::new(),
            devices: Vec::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.axis_names.is_empty()
    }

    pub fn axis_names(&self) -> &[String] {
        &self.axis_names
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn axis_size(&self, axis_name: &str) -> Option<usize> {
        self.axis_names
            .iter()
            .position(|n| n == axis_name)
            .map(|i| self.shape[i])
    }

    pub fn abstract_mesh(&self) -> AbstractMesh {
        AbstractMesh {
            axis_names: self.axis_names.clone(),
            shape: self.shape.clone(),
        }
    }
}

impl TryFrom<MeshLayout> for DeviceMesh {
    type Error = ShardingError;

    fn try_from(layout: MeshLayout) -> Result<Self, Self::Error> {
        DeviceMesh::new(layout.axes, layout.devices)
    }
}

impl From<DeviceMesh> for MeshLayout {
    fn from(mesh: DeviceMesh) -> Self {
        MeshLayout {
            axes: mesh.axis_names.into_iter().zip(mesh.shape).collect(),
            devices: mesh.devices,
        }
    }
}

/// Mesh topology without device assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbstractMesh {
    axis_names: Vec<String>,
    shape: Vec<usize>,
}

impl AbstractMesh {
    pub fn new<N: Into<String>>(
        axes: Vec<(N, usize)>,
    ) -> Result<Self, ShardingError> {
        let (axis_names, shape): (Vec<String>, Vec<usize>) = axes
            .into_iter()
            .map(|(name, size)| (name.into(), size))
            .unzip();
        validate_axes(&axis_names, &shape)?;
        Ok(Self { axis_names, shape })
    }

    pub fn axis_names(&self) -> &[String] {
        &self.axis_names
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

fn validate_axes(names: &[String], sizes: &[usize]) -> Result<(), ShardingError> {
    let mut seen = HashSet::with_capacity(names.len());
    for (name, size) in names.iter().zip(sizes) {
        if name.is_empty() {
            return Err(ShardingError::EmptyAxisName);
        }
        if *size == 0 {
            return Err(ShardingError::InvalidAxisSize(name.clone()));
        }
        if !seen.insert(name.as_str()) {
            return Err(ShardingError::DuplicateAxis(name.clone()));
        }
    }
    Ok(())
}
