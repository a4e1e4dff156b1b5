//! Session-derived identity for the gym front end.
//! Keep the public surface thin and split implementation across sub-modules.

mod profile;
mod provider;
mod resolver;
mod role;
mod session;

pub use profile::Profile;
pub use provider::{IdentityProvider, LoginRequest, ProfileStore, SignUpRequest};
pub use resolver::{ResolvedIdentity, SessionResolver, SessionResolverBuilder, DEFAULT_RESOLVE_TIMEOUT};
pub use role::{Role, RoleHomes, RoleSet, DEFAULT_HOME};
pub use session::{AuthEvent, Session, SessionToken};
