//! Authorization context threading.
//!
//! Every store operation is scoped to exactly one organization through an
//! explicit [`AuthContext`] parameter. Job handlers synthesize a
//! service-role context from the payload's organization id.

use uuid::Uuid;

/// Who is acting on behalf of the organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// A pipeline component running under a synthesized service role.
    Service(&'static str),
}

/// Capability scoping all persistence to one organization.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub organization_id: Uuid,
    pub actor: Actor,
}

impl AuthContext {
    /// Synthesize a service-role context for a pipeline component.
    pub fn service(organization_id: Uuid, component: &'static str) -> Self {
        Self {
            organization_id,
            actor: Actor::Service(component),
        }
    }
}
