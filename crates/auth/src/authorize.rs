use thiserror::Error;

use medstock_core::DomainError;

use crate::{Actor, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("actor '{actor}' lacks role '{role}'")]
    MissingRole { actor: String, role: String },
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        DomainError::unauthorized(value.to_string())
    }
}

/// Check that `actor` holds `required` (or is an admin).
///
/// - No IO
/// - No panics
/// - No business logic (separation-of-duties checks live in the state machines)
pub fn authorize(actor: &Actor, required: &Role) -> Result<(), AuthzError> {
    if actor.has_role(required) {
        Ok(())
    } else {
        Err(AuthzError::MissingRole {
            actor: actor.name.clone(),
            role: required.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medstock_core::ErrorKind;

    #[test]
    fn holder_of_role_is_allowed() {
        let actor = Actor::new("ana", [Role::QUALITY]);
        assert!(authorize(&actor, &Role::QUALITY).is_ok());
    }

    #[test]
    fn admin_satisfies_every_gate() {
        let actor = Actor::new("root", [Role::ADMIN]);
        assert!(authorize(&actor, &Role::SUPERVISION).is_ok());
        assert!(authorize(&actor, &Role::new("custom")).is_ok());
    }

    #[test]
    fn missing_role_maps_to_authorisation_kind() {
        let actor = Actor::new("luis", [Role::RECEPTION]);
        let err = authorize(&actor, &Role::SUPERVISION).unwrap_err();
        assert_eq!(
            err,
            AuthzError::MissingRole {
                actor: "luis".to_string(),
                role: "supervision".to_string()
            }
        );
        assert_eq!(DomainError::from(err).kind(), ErrorKind::Authorisation);
    }
}
