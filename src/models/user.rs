use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Organizer,
    Admin,
}

/// Аутентифицированный пользователь, от имени которого выполняется операция.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: i64,
    pub role: Role,
}

impl Requester {
    pub fn user(user_id: i64) -> Self {
        Self { user_id, role: Role::User }
    }

    pub fn admin(user_id: i64) -> Self {
        Self { user_id, role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Владелец брони или администратор.
    pub fn may_manage(&self, owner_id: i64) -> bool {
        self.user_id == owner_id || self.is_admin()
    }

    pub fn may_publish_events(&self) -> bool {
        matches!(self.role, Role::Organizer | Role::Admin)
    }
}
