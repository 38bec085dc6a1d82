use crate::core::{OpaqueId, ProjectedId};
use serde::{Deserialize, Serialize};

/// What a build does when two opaque ids project to the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Keep the opaque id seen first.
    KeepFirst,
    /// Overwrite with the opaque id seen last.
    KeepLast,
    /// Resolve none of them; lookups report the collision.
    #[default]
    MarkUnresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "opaqueId", rename_all = "snake_case")]
pub enum CollisionOutcome {
    Kept(OpaqueId),
    Unresolved,
}

/// Record of every opaque id that landed on one projected id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Collision {
    pub projected: ProjectedId,
    /// In scan order.
    pub candidates: Vec<OpaqueId>,
    pub outcome: CollisionOutcome,
}

impl Collision {
    pub fn is_unresolved(&self) -> bool {
        self.outcome == CollisionOutcome::Unresolved
    }
}
