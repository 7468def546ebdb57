use crate::mesh::DeviceId;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardingError {
    #[error("mesh axis names must be non-empty")]
    EmptyAxisName,
    #[error("mesh axis `{0}` must have size > 0")]
    InvalidAxisSize(String),
    #[error("mesh axis `{0}` appears more than once")]
    DuplicateAxis(String),
    #[error("mesh device `{0}` appears more than once")]
    DuplicateDevice(DeviceId),
    #[error("mesh has {actual} device(s), but axis sizes imply {expected}")]
    DeviceCountMismatch { expected: usize, actual: usize },
    #[error("partition spec references unknown mesh axis `{0}`")]
    UnknownAxis(String),
    #[error("mesh axis `{0}` is used more than once in the partition spec")]
    AxisReused(String),
    #[error("leaves are placed on different meshes")]
    MixedMeshes,
}
