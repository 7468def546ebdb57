#![allow(dead_code)]

use std::{cell::RefCell, sync::Arc};

use rlplug_config::Kwargs;
use rlplug_mesh::{DeviceId, DeviceMesh, MemoryKind, NamedSharding};
use rlplug_reshard::{
    ClusterConfig, ModelLoader, PluginConfig, RlCluster, install,
    model::{DType, Model, State, Variable},
    runtime::{HostArray, HostRuntime},
};
use serde_json::{Value, json};

pub fn kwargs(value: Value) -> Kwargs {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// Mesh over devices `first..first + product(sizes)`.
pub fn mesh(axes: &[(&str, usize)], first: u64) -> Arc<DeviceMesh> {
    let n = axes.iter().map(|(_, s)| *s as u64).product::<u64>();
    Arc::new(
        DeviceMesh::new(axes.to_vec(), (first..first + n).map(DeviceId).collect())
            .expect("valid mesh"),
    )
}

pub fn mesh_json(mesh: &DeviceMesh) -> Value {
    serde_json::to_value(mesh).expect("mesh serializes")
}

/// Installs the default adapters and builds a cluster from `extra` merged
/// over a role map with a 2x2 actor mesh and a 1x2 rollout mesh.
pub fn cluster(extra: Value) -> RlCluster<HostRuntime> {
    install(&PluginConfig::default()).expect("install");
    let mut args = kwargs(json!({
        "role_to_mesh": {
            "actor": mesh_json(&mesh(&[("fsdp", 2), ("tp", 2)], 0)),
            "reference": mesh_json(&mesh(&[("fsdp", 2), ("tp", 2)], 0)),
            "rollout": mesh_json(&mesh(&[("tp", 2)], 4)),
        },
    }));
    args.extend(kwargs(extra));
    let config = ClusterConfig::from_kwargs(args).expect("cluster config");
    RlCluster::new(config, HostRuntime::new())
}

/// Logical rules laying the tiny model out over `fsdp` and `tp`.
pub fn actor_rules() -> Value {
    json!([["vocab", "tp"], ["embed", "fsdp"], ["mlp", "tp"]])
}

/// A small decoder-shaped model on a single-device mesh.
pub fn tiny_model(rt: &HostRuntime, kind: MemoryKind) -> Model<HostArray> {
    let src = mesh(&[("x", 1)], 100);
    let leaf = |shape: Vec<usize>| {
        let n = shape.iter().product::<usize>();
        rt.array(
            (0..n).map(|i| i as f32 * 0.1).collect(),
            shape,
            DType::F32,
            NamedSharding::replicated(src.clone(), kind),
        )
        .expect("leaf")
    };
    let mut state = State::new();
    state.insert(
        "embedder.input_embedding",
        Variable::with_names(leaf(vec![8, 4]), [Some("vocab"), Some("embed")]),
    );
    state.insert(
        "layers.0.mlp.gate",
        Variable::with_names(leaf(vec![4, 8]), [Some("embed"), Some("mlp")]),
    );
    state.insert("final_norm.scale", Variable::new(leaf(vec![4])));
    Model::new("tiny", state)
}

#[derive(thiserror::Error, Debug)]
#[error("no checkpoint at `{0}`")]
pub struct MissingCheckpoint(pub String);

/// Loader recording every reference it is asked for.
#[derive(Default)]
pub struct RecordingLoader {
    pub calls: RefCell<Vec<(String, Option<DType>)>>,
    pub fail: bool,
}

impl ModelLoader<Model<HostArray>> for RecordingLoader {
    type Error = MissingCheckpoint;

    fn load(
        &self,
        reference: &str,
        _mesh: &Arc<DeviceMesh>,
        dtype: Option<DType>,
    ) -> Result<Model<HostArray>, MissingCheckpoint> {
        self.calls.borrow_mut().push((reference.to_string(), dtype));
        if self.fail {
            return Err(MissingCheckpoint(reference.to_string()));
        }
        Ok(Model::new(reference, State::new()))
    }
}
