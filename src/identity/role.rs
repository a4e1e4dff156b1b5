use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Application role stored in `profiles.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
    User,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Member, Role::User];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            "user" => Ok(Role::User),
            other => Err(AuthError::decode(format!("unknown role '{}'", other))),
        }
    }
}

/// Set of roles permitted on a screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn empty() -> Self { Self(BTreeSet::new()) }

    pub fn only(role: Role) -> Self { [role].into_iter().collect() }

    pub fn contains(&self, role: Role) -> bool { self.0.contains(&role) }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ { self.0.iter().copied() }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Role::as_str).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

pub const DEFAULT_HOME: &str = "/user";

/// Role -> landing path. Roles missing from the table land on `fallback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleHomes {
    homes: HashMap<Role, String>,
    fallback: String,
}

impl RoleHomes {
    /// An empty table; every role lands on `fallback`.
    pub fn with_fallback<S: Into<String>>(fallback: S) -> Self {
        Self { homes: HashMap::new(), fallback: fallback.into() }
    }

    pub fn insert<S: Into<String>>(mut self, role: Role, path: S) -> Self {
        self.homes.insert(role, path.into());
        self
    }

    pub fn home(&self, role: Role) -> &str {
        self.homes.get(&role).map(String::as_str).unwrap_or(&self.fallback)
    }

    pub fn fallback(&self) -> &str { &self.fallback }
}

impl Default for RoleHomes {
    fn default() -> Self {
        RoleHomes::with_fallback(DEFAULT_HOME)
            .insert(Role::Admin, "/admin")
            .insert(Role::Member, "/member")
            .insert(Role::User, "/user")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roles_case_insensitive() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" Member ".parse::<Role>().unwrap(), Role::Member);
        assert_eq!("USER".parse::<Role>().unwrap(), Role::User);
        assert!("coach".parse::<Role>().is_err());
    }

    #[test]
    fn role_serde_uses_table_strings() {
        assert_eq!(serde_json::to_string(&Role::Member).unwrap(), "\"member\"");
        let r: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(r, Role::Admin);
    }

    #[test]
    fn default_homes() {
        let homes = RoleHomes::default();
        assert_eq!(homes.home(Role::Admin), "/admin");
        assert_eq!(homes.home(Role::Member), "/member");
        assert_eq!(homes.home(Role::User), "/user");
    }

    #[test]
    fn missing_role_uses_fallback() {
        let homes = RoleHomes::with_fallback("/welcome").insert(Role::Admin, "/admin");
        assert_eq!(homes.home(Role::Member), "/welcome");
        assert_eq!(homes.fallback(), "/welcome");
    }

    #[test]
    fn role_set_display_is_sorted() {
        let set: RoleSet = [Role::User, Role::Admin].into_iter().collect();
        assert_eq!(set.to_string(), "{admin, user}");
        assert!(set.contains(Role::Admin));
        assert!(!set.contains(Role::Member));
    }
}
