use std::{collections::BTreeMap, sync::Arc};

use rlplug_config::Kwargs;
use rlplug_mesh::{DeviceMesh, LogicalAxisRules};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{ROLE_AXIS_RULES_KEY, cluster::RlCluster, role::Role};

/// Logical-axis rules per role, as passed to the cluster config under
/// `role_to_logical_axis_rule`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleAxisRules(BTreeMap<Role, LogicalAxisRules>);

impl RoleAxisRules {
    pub fn new(rules: BTreeMap<Role, LogicalAxisRules>) -> Self {
        Self(rules)
    }

    /// Reads the rules out of preserved kwargs. Missing or malformed rules
    /// yield an empty set.
    pub fn from_extra_fields(extra: Option<&Kwargs>) -> Self {
        let Some(value) = extra.and_then(|e| e.get(ROLE_AXIS_RULES_KEY)) else {
            return Self::default();
        };
        match serde_json::from_value(value.clone()) {
            Ok(rules) => rules,
            Err(e) => {
                warn!("ignoring malformed {}: {}", ROLE_AXIS_RULES_KEY, e);
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rules for `role`; an empty rule list counts as absent.
    pub fn get(&self, role: Role) -> Option<&LogicalAxisRules> {
        self.0.get(&role).filter(|r| !r.is_empty())
    }

    /// Rules for the mesh's own role, else the first of
    /// [`Role::FALLBACK_ORDER`] that has any.
    pub fn resolve(&self, role: Option<Role>) -> Option<&LogicalAxisRules> {
        role.and_then(|r| self.get(r))
            .or_else(|| Role::FALLBACK_ORDER.iter().find_map(|r| self.get(*r)))
    }
}

/// The role whose mesh is `mesh` itself. Equal-valued meshes of other roles
/// do not match.
pub fn role_for_mesh(
    r2m: &BTreeMap<Role, Arc<DeviceMesh>>,
    mesh: &Arc<DeviceMesh>,
) -> Option<Role> {
    r2m.iter()
        .find(|(_, m)| Arc::ptr_eq(m, mesh))
        .map(|(role, _)| *role)
}

/// Axis rules to lay parameters out with on `mesh`, if any apply.
pub fn resolve_axis_rules<R>(
    cluster: &RlCluster<R>,
    mesh: &Arc<DeviceMesh>,
) -> Option<LogicalAxisRules> {
    let rules = cluster.role_axis_rules();
    let role = role_for_mesh(cluster.r2m(), mesh);
    let resolved = rules.resolve(role).cloned();
    debug!(
        "axis rules for mesh {:?} (role {:?}): {}",
        mesh.axis_names(),
        role,
        if resolved.is_some() { "found" } else { "default" }
    );
    resolved
}
