use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Tenant,
    Owner,
    Admin,
    Operator,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Tenant => "Tenant",
            Role::Owner => "Owner",
            Role::Admin => "Admin",
            Role::Operator => "Operator",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Role {
    type Err = AuthorizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Tenant" => Ok(Role::Tenant),
            "Owner" => Ok(Role::Owner),
            "Admin" => Ok(Role::Admin),
            "Operator" => Ok(Role::Operator),
            other => Err(AuthorizationError::UnknownRole(other.to_string())),
        }
    }
}

/// Caller identity, already resolved by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub roles: Vec<Role>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            roles,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("user {email} lacks any of the roles {required:?}")]
    MissingRole { email: String, required: Vec<Role> },
    #[error("user {caller} does not own the reservation held by {owner}")]
    NotOwner { caller: String, owner: String },
    #[error("unknown role {0:?}")]
    UnknownRole(String),
}

/// Pass if the caller holds at least one of `allowed`.
pub fn require_role(identity: &Identity, allowed: &[Role]) -> Result<(), AuthorizationError> {
    if allowed.iter().any(|r| identity.has_role(*r)) {
        return Ok(());
    }
    Err(AuthorizationError::MissingRole {
        email: identity.email.clone(),
        required: allowed.to_vec(),
    })
}

/// Email is the ownership anchor for tenant-side operations.
pub fn require_owner(identity: &Identity, owner_email: &str) -> Result<(), AuthorizationError> {
    if identity.email == owner_email {
        return Ok(());
    }
    Err(AuthorizationError::NotOwner {
        caller: identity.email.clone(),
        owner: owner_email.to_string(),
    })
}
