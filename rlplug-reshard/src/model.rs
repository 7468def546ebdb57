use std::{
    collections::{BTreeMap, btree_map},
    fmt,
    sync::Arc,
};

use rlplug_mesh::{
    DeviceMesh, LogicalAxisRules, MemoryKind, NamedSharding, PartitionSpec,
    ShardingError, equivalent,
};
use serde::{Deserialize, Serialize};

use crate::descriptor::{ArchDescriptor, Describe};

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    Bf16,
    F16,
    I32,
}

impl DType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::Bf16 | DType::F16 => 2,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "float32",
            DType::Bf16 => "bfloat16",
            DType::F16 => "float16",
            DType::I32 => "int32",
        };
        f.write_str(name)
    }
}

/// A distributed array as seen by placement code.
pub trait ShardedArray {
    fn shape(&self) -> &[usize];
    fn dtype(&self) -> DType;
    fn sharding(&self) -> &NamedSharding;
}

/// A parameter leaf: the array plus its logical sharding annotation, one
/// optional logical axis name per dimension.
#[derive(Debug, Clone)]
pub struct Variable<A> {
    pub value: A,
    pub sharding_names: Option<Vec<Option<String>>>,
}

impl<A> Variable<A> {
    pub fn new(value: A) -> Self {
        Self {
            value,
            sharding_names: None,
        }
    }

    pub fn with_names<I, N>(value: A, names: I) -> Self
    where
        I: IntoIterator<Item = Option<N>>,
        N: Into<String>,
    {
        Self {
            value,
            sharding_names: Some(
                names.into_iter().map(|n| n.map(Into::into)).collect(),
            ),
        }
    }

    /// Partition spec for this leaf. Under axis rules the annotation is
    /// translated; without rules annotation names are mesh axes already.
    pub fn partition_spec(&self, rules: Option<&LogicalAxisRules>) -> PartitionSpec {
        match (&self.sharding_names, rules) {
            (None, _) => PartitionSpec::replicated(),
            (Some(names), Some(rules)) => rules.resolve(names),
            (Some(names), None) => PartitionSpec::from_names(names),
        }
    }
}

pub type Shardings = BTreeMap<String, NamedSharding>;

/// Parameter values of a model, keyed by path (`layers.0.attn.q`).
#[derive(Debug, Clone)]
pub struct State<A> {
    vars: BTreeMap<String, Variable<A>>,
}

impl<A> Default for State<A> {
    fn default() -> Self {
        Self {
            vars: BTreeMap::new(),
        }
    }
}

impl<A> State<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<P: Into<String>>(&mut self, path: P, var: Variable<A>) {
        self.vars.insert(path.into(), var);
    }

    pub fn get(&self, path: &str) -> Option<&Variable<A>> {
        self.vars.get(path)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Variable<A>> {
        self.vars.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.vars.keys()
    }

    /// Replaces every leaf value, keeping paths and annotations.
    pub fn try_map<B, E, F>(self, mut f: F) -> Result<State<B>, E>
    where
        F: FnMut(&str, A) -> Result<B, E>,
    {
        let mut vars = BTreeMap::new();
        for (path, var) in self.vars {
            let value = f(&path, var.value)?;
            vars.insert(
                path,
                Variable {
                    value,
                    sharding_names: var.sharding_names,
                },
            );
        }
        Ok(State { vars })
    }

    pub fn partition_specs(
        &self,
        rules: Option<&LogicalAxisRules>,
    ) -> BTreeMap<String, PartitionSpec> {
        self.vars
            .iter()
            .map(|(path, var)| (path.clone(), var.partition_spec(rules)))
            .collect()
    }
}

impl<A: ShardedArray> State<A> {
    /// The mesh all leaves live on; `None` for an empty state.
    pub fn mesh_info(&self) -> Result<Option<Arc<DeviceMesh>>, ShardingError> {
        let mut meshes = self.vars.values().map(|v| v.value.sharding().mesh());
        let Some(first) = meshes.next() else {
            return Ok(None);
        };
        if meshes.any(|m| !equivalent(&**m, &**first)) {
            return Err(ShardingError::MixedMeshes);
        }
        Ok(Some(first.clone()))
    }

    /// Whether any leaf sits in `kind`.
    pub fn any_in_memory(&self, kind: MemoryKind) -> bool {
        self.vars
            .values()
            .any(|v| v.value.sharding().memory_kind() == kind)
    }

    pub fn first_dtype(&self) -> Option<DType> {
        self.vars.values().next().map(|v| v.value.dtype())
    }

    pub fn size_in_bytes(&self) -> usize {
        self.vars
            .values()
            .map(|v| {
                v.value.shape().iter().product::<usize>() * v.value.dtype().size_in_bytes()
            })
            .sum()
    }
}

impl<A> IntoIterator for State<A> {
    type Item = (String, Variable<A>);
    type IntoIter = btree_map::IntoIter<String, Variable<A>>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.into_iter()
    }
}

impl<A> FromIterator<(String, Variable<A>)> for State<A> {
    fn from_iter<T: IntoIterator<Item = (String, Variable<A>)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// A model that can be taken apart into static structure and parameter
/// state and put back together.
pub trait Module: Sized {
    type Graph;
    type Array: ShardedArray;

    fn state(&self) -> &State<Self::Array>;
    fn split(self) -> (Self::Graph, State<Self::Array>);
    fn merge(graph: Self::Graph, state: State<Self::Array>) -> Self;
}

/// Static part of a [`Model`].
#[derive(Debug, Clone, PartialEq)]
pub struct GraphDef {
    pub name: String,
    pub arch: Option<ArchDescriptor>,
}

/// Plain parameter-tree model.
#[derive(Debug, Clone)]
pub struct Model<A> {
    graph: GraphDef,
    state: State<A>,
}

impl<A> Model<A> {
    pub fn new<N: Into<String>>(name: N, state: State<A>) -> Self {
        Self {
            graph: GraphDef {
                name: name.into(),
                arch: None,
            },
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.graph.name
    }
}

impl<A: ShardedArray> Module for Model<A> {
    type Graph = GraphDef;
    type Array = A;

    fn state(&self) -> &State<A> {
        &self.state
    }

    fn split(self) -> (GraphDef, State<A>) {
        (self.graph, self.state)
    }

    fn merge(graph: GraphDef, state: State<A>) -> Self {
        Self { graph, state }
    }
}

impl<A> Describe for Model<A> {
    fn arch_descriptor(&self) -> Option<&ArchDescriptor> {
        self.graph.arch.as_ref()
    }

    fn set_arch_descriptor(&mut self, descriptor: ArchDescriptor) {
        self.graph.arch = Some(descriptor);
    }
}

#[cfg(test)]
mod tests {
    use rlplug_mesh::{DeviceId, PartitionDim};

    use super::*;

    #[derive(Debug, Clone)]
    struct Meta {
        shape: Vec<usize>,
        dtype: DType,
        sharding: NamedSharding,
    }

    impl ShardedArray for Meta {
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

    fn mesh(devices: &[u64]) -> Arc<DeviceMesh> {
        Arc::new(
            DeviceMesh::new(
                vec![("fsdp", devices.len())],
                devices.iter().copied().map(DeviceId).collect(),
            )
            .unwrap(),
        )
    }

    fn leaf(mesh: &Arc<DeviceMesh>, kind: MemoryKind) -> Meta {
        Meta {
            shape: vec![4, 4],
            dtype: DType::F32,
            sharding: NamedSharding::replicated(mesh.clone(), kind),
        }
    }

    #[test]
    fn test_mesh_info() {
        let a = mesh(&[0, 1]);
        let mut state = State::new();
        assert!(state.mesh_info().unwrap().is_none());
        state.insert("w", Variable::new(leaf(&a, MemoryKind::Device)));
        state.insert("b", Variable::new(leaf(&Arc::new((*a).clone()), MemoryKind::Device)));
        let info = state.mesh_info().unwrap().unwrap();
        assert!(equivalent(&*info, &*a));

        state.insert("c", Variable::new(leaf(&mesh(&[1, 0]), MemoryKind::Device)));
        assert_eq!(state.mesh_info().unwrap_err(), ShardingError::MixedMeshes);
    }

    #[test]
    fn test_memory_any() {
        let a = mesh(&[0, 1]);
        let mut state = State::new();
        state.insert("w", Variable::new(leaf(&a, MemoryKind::PinnedHost)));
        assert!(!state.any_in_memory(MemoryKind::Device));
        state.insert("b", Variable::new(leaf(&a, MemoryKind::Device)));
        assert!(state.any_in_memory(MemoryKind::Device));
        assert_eq!(state.size_in_bytes(), 2 * 16 * 4);
    }

    #[test]
    fn test_partition_spec_with_and_without_rules() {
        let var = Variable::with_names(leaf(&mesh(&[0]), MemoryKind::Device), [
            Some("embed"),
            None,
        ]);
        assert_eq!(
            var.partition_spec(None).dims(),
            &[PartitionDim::sharded("embed"), PartitionDim::Replicated]
        );
        let rules =
            LogicalAxisRules::default().rule("embed", PartitionDim::sharded("fsdp"));
        assert_eq!(
            var.partition_spec(Some(&rules)).dims(),
            &[PartitionDim::sharded("fsdp"), PartitionDim::Replicated]
        );
        let bare = Variable::new(leaf(&mesh(&[0]), MemoryKind::Device));
        assert!(bare.partition_spec(Some(&rules)).is_replicated());
    }
}
