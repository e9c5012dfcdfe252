use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Staff,
    Admin,
}

/// The authenticated user on whose behalf an operation runs. The request layer
/// resolves it and passes it in; nothing in this crate reads ambient identity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn customer(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: ActorRole::Customer,
        }
    }

    pub fn staff(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: ActorRole::Staff,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, ActorRole::Staff | ActorRole::Admin)
    }
}
