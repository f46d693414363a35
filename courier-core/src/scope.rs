//! Organisation scoping
//!
//! Every delivery and alert operation runs under an organisation context;
//! a resource belonging to a different organisation is invisible to it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::OrganizationId;

/// The organisation context an operation executes under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgContext {
    pub organization: OrganizationId,
    /// The acting principal, for audit trails
    #[serde(default)]
    pub actor: Option<String>,
}

impl OrgContext {
    #[must_use]
    pub const fn new(organization: OrganizationId) -> Self {
        Self {
            organization,
            actor: None,
        }
    }

    #[must_use]
    pub fn with_actor(organization: OrganizationId, actor: impl Into<String>) -> Self {
        Self {
            organization,
            actor: Some(actor.into()),
        }
    }

    /// Check that a resource owned by `owner` is visible to this context
    pub fn ensure_owns(&self, owner: &OrganizationId) -> Result<(), ScopeError> {
        if &self.organization == owner {
            Ok(())
        } else {
            Err(ScopeError::AccessDenied {
                context: self.organization.clone(),
                resource: owner.clone(),
            })
        }
    }
}

/// Error raised when an operation crosses an organisation boundary
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("organisation {context} cannot access a resource owned by {resource}")]
    AccessDenied {
        context: OrganizationId,
        resource: OrganizationId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_org_allowed() {
        let ctx = OrgContext::new(OrganizationId::new("org-a"));
        assert!(ctx.ensure_owns(&OrganizationId::new("org-a")).is_ok());
    }

    #[test]
    fn test_cross_org_denied() {
        let ctx = OrgContext::with_actor(OrganizationId::new("org-a"), "alice");
        let err = ctx
            .ensure_owns(&OrganizationId::new("org-b"))
            .expect_err("cross-org access must fail");
        assert!(matches!(err, ScopeError::AccessDenied { .. }));
    }
}
