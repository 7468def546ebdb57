use std::fmt;

use serde::{Deserialize, Serialize};

/// Function of a model within the RL orchestration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Policy being trained; also produces rollouts in colocated setups.
    Actor,
    Critic,
    /// Frozen copy scoring rollouts for the KL term.
    Reference,
    Reward,
    Rollout,
}

impl Role {
    /// Roles tried, in order, when the mesh's own role has no axis rule.
    pub const FALLBACK_ORDER: [Role; 2] = [Role::Actor, Role::Reference];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Actor => "actor",
            Role::Critic => "critic",
            Role::Reference => "reference",
            Role::Reward => "reward",
            Role::Rollout => "rollout",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
