use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::Role;

/// The authenticated caller as seen by the authorizer: identity plus the
/// role rows loaded for it. Ownership relationships (self, franchise
/// operator) are resolved by the caller against the target resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn new(user_id: Uuid, roles: Vec<Role>) -> Self {
        Self { user_id, roles }
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(&Role::Admin)
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
