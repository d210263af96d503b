//! Identity of one endpoint of a user session.

use std::fmt;

use crate::stream::proto::VaspContextMsg;

/// Which side of a transfer an institution plays in the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Originator,
    Beneficiary,
}

impl Role {
    pub fn is_originator(self) -> bool {
        matches!(self, Self::Originator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Originator => f.write_str("originator"),
            Self::Beneficiary => f.write_str("beneficiary"),
        }
    }
}

/// Immutable `(session, institution, role)` tuple bound to exactly one
/// streaming connection.
///
/// Fields are private so a context cannot be edited after a connection has
/// been opened with it; switching institutions means building a new one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionContext {
    session_id: String,
    vasp_id: String,
    role: Role,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, vasp_id: impl Into<String>, role: Role) -> Self {
        Self {
            session_id: session_id.into(),
            vasp_id: vasp_id.into(),
            role,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn vasp_id(&self) -> &str {
        &self.vasp_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Handshake payload sent once the transport is ready.
    pub fn to_wire(&self) -> VaspContextMsg {
        VaspContextMsg {
            vasp_id: self.vasp_id.clone(),
            context_id: self.session_id.clone(),
            originator: self.role.is_originator(),
        }
    }
}

impl From<VaspContextMsg> for SessionContext {
    fn from(msg: VaspContextMsg) -> Self {
        let role = if msg.originator {
            Role::Originator
        } else {
            Role::Beneficiary
        };
        Self::new(msg.context_id, msg.vasp_id, role)
    }
}

#[cfg(test)]
mod tests {
    use super::{Role, SessionContext};

    #[test]
    fn wire_form_maps_session_id_to_context_id() {
        let context = SessionContext::new("session-1", "ALICE-GUID", Role::Beneficiary);
        let wire = context.to_wire();
        assert_eq!(wire.context_id, "session-1");
        assert_eq!(wire.vasp_id, "ALICE-GUID");
        assert!(!wire.originator);
        assert_eq!(SessionContext::from(wire), context);
    }
}
