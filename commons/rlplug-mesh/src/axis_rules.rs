use serde::{Deserialize, Serialize};

use crate::sharding::{PartitionDim, PartitionSpec};

/// One `logical name -> mesh axes` mapping. A rule without mesh axes keeps
/// the dimension replicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, PartitionDim)", into = "(String, PartitionDim)")]
pub struct AxisRule {
    pub logical: String,
    pub mesh: PartitionDim,
}

impl From<(String, PartitionDim)> for AxisRule {
    fn from((logical, mesh): (String, PartitionDim)) -> Self {
        Self { logical, mesh }
    }
}

impl From<AxisRule> for (String, PartitionDim) {
    fn from(rule: AxisRule) -> Self {
        (rule.logical, rule.mesh)
    }
}

/// Ordered logical-axis rules, e.g.
/// `[["embed", "fsdp"], ["mlp", ["tensor", "expert"]], ["norm", null]]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalAxisRules(Vec<AxisRule>);

impl LogicalAxisRules {
    pub fn new(rules: Vec<AxisRule>) -> Self {
        Self(rules)
    }

    pub fn rule<N: Into<String>>(mut self, logical: N, mesh: PartitionDim) -> Self {
        self.0.push(AxisRule {
            logical: logical.into(),
            mesh,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn rules(&self) -> &[AxisRule] {
        &self.0
    }

    /// Translates logical dimension names into a mesh partition spec.
    ///
    /// Rules are applied in order. A rule assigns its mesh axes to the first
    /// dimension carrying its logical name when that dimension is still
    /// unassigned and none of the axes is taken yet. Dimensions left over are
    /// replicated.
    pub fn resolve(&self, logical: &[Option<String>]) -> PartitionSpec {
        let mut assigned: Vec<Option<PartitionDim>> = vec![None; logical.len()];
        for rule in &self.0 {
            let Some(pos) = logical
                .iter()
                .position(|n| n.as_deref() == Some(rule.logical.as_str()))
            else {
                continue;
            };
            if assigned[pos].is_some() {
                continue;
            }
            let free = rule.mesh.mesh_axes().iter().all(|axis| {
                !assigned
                    .iter()
                    .flatten()
                    .any(|d| d.mesh_axes().contains(axis))
            });
            if free {
                assigned[pos] = Some(rule.mesh.clone());
            }
        }
        PartitionSpec::new(
            assigned
                .into_iter()
                .map(|d| d.unwrap_or(PartitionDim::Replicated))
                .collect(),
        )
    }
}
