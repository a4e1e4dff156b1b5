//! Route guards: pure decisions over a `ResolvedIdentity` snapshot.
//!
//! `protected` gates a screen behind a role set, `public` keeps signed-in users off
//! screens meant for visitors (sign-in, package listing). Neither can fail; the
//! screen itself is only built when the decision is `Render`.

use crate::identity::{ResolvedIdentity, Role, RoleHomes, RoleSet};

pub const SIGN_IN_PATH: &str = "/auth";

/// Details for the access-denied view. The user stays on the page; `home` is
/// where the "go to your dashboard" action points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub current: Role,
    pub required: RoleSet,
    pub home: String,
}

impl Denial {
    pub fn message(&self) -> String {
        format!(
            "You don't have permission to access this area. Your role: {}. Required: {}.",
            self.current, self.required
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<V> {
    /// Session still resolving; show a placeholder and wait for the next state.
    Loading,
    RedirectToSignIn,
    RedirectToRoleHome(String),
    AccessDenied(Denial),
    Render(V),
}

impl<V> Decision<V> {
    pub fn is_render(&self) -> bool { matches!(self, Decision::Render(_)) }

    /// Target path when the decision navigates away.
    pub fn redirect_target(&self) -> Option<&str> {
        match self {
            Decision::RedirectToSignIn => Some(SIGN_IN_PATH),
            Decision::RedirectToRoleHome(path) => Some(path),
            _ => None,
        }
    }

    /// Same decision with the view dropped; handy for logging and comparisons.
    pub fn kind(&self) -> Decision<()> {
        match self {
            Decision::Loading => Decision::Loading,
            Decision::RedirectToSignIn => Decision::RedirectToSignIn,
            Decision::RedirectToRoleHome(p) => Decision::RedirectToRoleHome(p.clone()),
            Decision::AccessDenied(d) => Decision::AccessDenied(d.clone()),
            Decision::Render(_) => Decision::Render(()),
        }
    }
}

/// Guard for screens restricted to `required`.
pub fn protected<V, F>(required: &RoleSet, state: &ResolvedIdentity, homes: &RoleHomes, view: F) -> Decision<V>
where
    F: FnOnce() -> V,
{
    if state.resolving {
        return Decision::Loading;
    }
    let Some(profile) = state.profile.as_ref() else {
        return Decision::RedirectToSignIn;
    };
    if !required.contains(profile.role) {
        return Decision::AccessDenied(Denial {
            current: profile.role,
            required: required.clone(),
            home: homes.home(profile.role).to_string(),
        });
    }
    Decision::Render(view())
}

/// Guard for visitor-only screens.
pub fn public<V, F>(state: &ResolvedIdentity, homes: &RoleHomes, view: F) -> Decision<V>
where
    F: FnOnce() -> V,
{
    if state.resolving {
        return Decision::Loading;
    }
    match state.profile.as_ref() {
        Some(profile) => Decision::RedirectToRoleHome(homes.home(profile.role).to_string()),
        None => Decision::Render(view()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Profile;

    fn as_role(role: Role) -> ResolvedIdentity {
        ResolvedIdentity::signed_in(Profile::new("u1", "u1@gym.io", role))
    }

    #[test]
    fn role_membership_decides_for_every_role() {
        let homes = RoleHomes::default();
        for role in Role::ALL {
            for required in Role::ALL {
                let set = RoleSet::only(required);
                let d = protected(&set, &as_role(role), &homes, || ());
                if role == required {
                    assert!(d.is_render(), "{} should render {}", role, set);
                } else {
                    assert!(matches!(d, Decision::AccessDenied(_)), "{} should be denied {}", role, set);
                }
            }
            let absent = protected(&RoleSet::only(role), &ResolvedIdentity::anonymous(), &homes, || ());
            assert_eq!(absent, Decision::RedirectToSignIn);
        }
    }

    #[test]
    fn member_denied_admin_area() {
        let required = RoleSet::only(Role::Admin);
        let d = protected(&required, &as_role(Role::Member), &RoleHomes::default(), || "admin dashboard");
        match d {
            Decision::AccessDenied(denial) => {
                assert_eq!(denial.current, Role::Member);
                assert_eq!(denial.required, required);
                assert_eq!(denial.home, "/member");
                assert!(denial.message().contains("member"));
                assert!(denial.message().contains("{admin}"));
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn loading_wins_over_everything() {
        let homes = RoleHomes::default();
        let mut state = as_role(Role::Admin);
        state.resolving = true;
        assert_eq!(protected(&RoleSet::only(Role::Admin), &state, &homes, || ()), Decision::Loading);
        assert_eq!(public(&state, &homes, || ()), Decision::Loading);
        assert_eq!(public(&ResolvedIdentity::unresolved(), &homes, || ()), Decision::Loading);
    }

    #[test]
    fn view_not_built_unless_rendered() {
        let mut built = false;
        let _ = protected(&RoleSet::only(Role::Admin), &as_role(Role::User), &RoleHomes::default(), || built = true);
        assert!(!built);
    }

    #[test]
    fn public_guard_redirects_signed_in_users_home() {
        let homes = RoleHomes::default();
        assert_eq!(public(&as_role(Role::Admin), &homes, || ()), Decision::RedirectToRoleHome("/admin".into()));
        assert_eq!(public(&as_role(Role::User), &homes, || ()), Decision::RedirectToRoleHome("/user".into()));
        assert_eq!(public(&ResolvedIdentity::anonymous(), &homes, || 7), Decision::Render(7));
    }

    #[test]
    fn public_guard_uses_fallback_for_unmapped_role() {
        let homes = RoleHomes::with_fallback("/start");
        let d = public(&as_role(Role::Member), &homes, || ());
        assert_eq!(d.redirect_target(), Some("/start"));
    }

    #[test]
    fn empty_role_set_denies_everyone() {
        let d = protected(&RoleSet::empty(), &as_role(Role::Admin), &RoleHomes::default(), || ());
        assert!(matches!(d, Decision::AccessDenied(_)));
    }
}
