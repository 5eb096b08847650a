use serde::{Deserialize, Serialize};

use medstock_core::ActorId;

use crate::Role;

/// The authenticated user on whose behalf a command runs.
///
/// Resolved by the outer layer (session, token) before reaching the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn new(name: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            id: ActorId::new(),
            name: name.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role || r.is_admin())
    }
}
