use serde::{Deserialize, Serialize};

use super::role::Role;

/// Row of the `profiles` table: the authorization record for one identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// Identity-provider user id.
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub role: Role,
}

impl Profile {
    pub fn new<S: Into<String>>(id: S, email: S, role: Role) -> Self {
        Self { id: id.into(), email: email.into(), full_name: None, role }
    }

    pub fn with_full_name<S: Into<String>>(mut self, name: S) -> Self {
        self.full_name = Some(name.into());
        self
    }

    /// Name shown in dashboard headers; falls back to the e-mail address.
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or(&self.email)
    }
}
