//! Application route map and per-screen guard evaluation.
//!
//! Each route names the screen it shows and the guard in front of it. A
//! `ScreenWatcher` re-evaluates one route whenever the resolver publishes a new
//! identity, which gives every mounted screen the
//! `Loading -> {Redirect, Denied, Rendered} -> Loading ...` lifecycle.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::guard::{self, Decision, SIGN_IN_PATH};
use crate::identity::{ResolvedIdentity, Role, RoleHomes, RoleSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    SignIn,
    Packages,
    AdminDashboard,
    AdminMembers,
    MemberDashboard,
    MemberBills,
    UserDashboard,
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Screen::SignIn => "sign-in",
            Screen::Packages => "packages",
            Screen::AdminDashboard => "admin dashboard",
            Screen::AdminMembers => "admin members",
            Screen::MemberDashboard => "member dashboard",
            Screen::MemberBills => "member bills",
            Screen::UserDashboard => "user dashboard",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Unconditional redirect to another path.
    Alias(String),
    Public(Screen),
    Protected(Screen, RoleSet),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    NotFound,
    Alias(String),
    Guarded(Decision<Screen>),
}

impl RouteOutcome {
    fn next_path(&self) -> Option<&str> {
        match self {
            RouteOutcome::Alias(p) => Some(p),
            RouteOutcome::Guarded(d) => d.redirect_target(),
            RouteOutcome::NotFound => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<(String, Access)>,
    homes: RoleHomes,
}

impl RouteTable {
    const MAX_HOPS: usize = 8;

    pub fn new(homes: RoleHomes) -> Self {
        Self { routes: Vec::new(), homes }
    }

    pub fn route<S: Into<String>>(mut self, path: S, access: Access) -> Self {
        self.routes.push((path.into(), access));
        self
    }

    /// The gym front end's routes.
    pub fn gym() -> Self {
        let admin = RoleSet::only(Role::Admin);
        let member = RoleSet::only(Role::Member);
        RouteTable::new(RoleHomes::default())
            .route("/", Access::Alias(SIGN_IN_PATH.to_string()))
            .route("/packages", Access::Public(Screen::Packages))
            .route(SIGN_IN_PATH, Access::Public(Screen::SignIn))
            .route("/admin", Access::Protected(Screen::AdminDashboard, admin.clone()))
            .route("/admin/members", Access::Protected(Screen::AdminMembers, admin))
            .route("/member", Access::Protected(Screen::MemberDashboard, member.clone()))
            .route("/member/bills", Access::Protected(Screen::MemberBills, member))
            .route("/user", Access::Protected(Screen::UserDashboard, RoleSet::only(Role::User)))
    }

    pub fn homes(&self) -> &RoleHomes { &self.homes }

    pub fn access(&self, path: &str) -> Option<&Access> {
        let path = normalize(path);
        self.routes.iter().find(|(p, _)| p == path).map(|(_, a)| a)
    }

    pub fn decide(&self, path: &str, state: &ResolvedIdentity) -> RouteOutcome {
        match self.access(path) {
            None => RouteOutcome::NotFound,
            Some(Access::Alias(to)) => RouteOutcome::Alias(to.clone()),
            Some(Access::Public(screen)) => RouteOutcome::Guarded(guard::public(state, &self.homes, || *screen)),
            Some(Access::Protected(screen, roles)) => {
                RouteOutcome::Guarded(guard::protected(roles, state, &self.homes, || *screen))
            }
        }
    }

    /// Follow aliases and guard redirects from `path` until a page is shown.
    /// Returns the final path and its outcome. Stops after a bounded number of hops.
    pub fn navigate(&self, path: &str, state: &ResolvedIdentity) -> (String, RouteOutcome) {
        let mut current = normalize(path).to_string();
        let mut outcome = self.decide(&current, state);
        for _ in 0..Self::MAX_HOPS {
            let Some(next) = outcome.next_path() else { break };
            if next == current {
                break;
            }
            debug!(target: "routes", from = %current, to = %next, "redirect");
            current = next.to_string();
            outcome = self.decide(&current, state);
        }
        (current, outcome)
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim();
    let trimmed = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    if trimmed.len() > 1 { trimmed.trim_end_matches('/') } else { trimmed }
}

/// Tracks the guard outcome of one mounted route as the identity changes.
pub struct ScreenWatcher {
    table: Arc<RouteTable>,
    path: String,
    rx: watch::Receiver<ResolvedIdentity>,
    last: Option<RouteOutcome>,
}

impl ScreenWatcher {
    pub fn new<S: Into<String>>(table: Arc<RouteTable>, path: S, rx: watch::Receiver<ResolvedIdentity>) -> Self {
        Self { table, path: path.into(), rx, last: None }
    }

    pub fn path(&self) -> &str { &self.path }

    /// Evaluate against the latest published identity.
    pub fn current(&mut self) -> RouteOutcome {
        let outcome = {
            let state = self.rx.borrow_and_update();
            self.table.decide(&self.path, &state)
        };
        self.last = Some(outcome.clone());
        outcome
    }

    /// Wait for the next identity change that alters this route's outcome.
    /// `None` once the resolver is gone.
    pub async fn next(&mut self) -> Option<RouteOutcome> {
        loop {
            self.rx.changed().await.ok()?;
            let outcome = {
                let state = self.rx.borrow_and_update();
                self.table.decide(&self.path, &state)
            };
            if self.last.as_ref() != Some(&outcome) {
                debug!(target: "routes", path = %self.path, outcome = ?outcome, "screen transition");
                self.last = Some(outcome.clone());
                return Some(outcome);
            }
        }
    }
}
