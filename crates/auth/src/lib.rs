//! `medstock-auth`: actor identity and role gates.
//!
//! Authentication and role administration live outside the engine; this crate
//! only models the resolved actor handed to every command and the check that
//! a transition's required role is held.

pub mod authorize;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, authorize};
pub use principal::Actor;
pub use roles::Role;
