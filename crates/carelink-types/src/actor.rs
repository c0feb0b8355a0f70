use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Staff roles used in per-route allow-lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaffRole {
    Admin,
    Clinician,
    Nurse,
    Staff,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Clinician => "CLINICIAN",
            Self::Nurse => "NURSE",
            Self::Staff => "STAFF",
        }
    }
}

impl std::str::FromStr for StaffRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Self::Admin),
            "CLINICIAN" => Ok(Self::Clinician),
            "NURSE" => Ok(Self::Nurse),
            "STAFF" => Ok(Self::Staff),
            other => Err(format!("unknown staff role: {other}")),
        }
    }
}

/// Which side of the clinic relationship an identity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    Staff,
    Patient,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Patient => "patient",
        }
    }
}

impl std::str::FromStr for ActorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staff" => Ok(Self::Staff),
            "patient" => Ok(Self::Patient),
            other => Err(format!("unknown actor kind: {other}")),
        }
    }
}

/// The caller identity, resolved once per request by middleware and passed
/// down as a request extension. Staff and patient sessions are issued
/// separately; a request resolves to exactly one of these or is rejected.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Actor {
    Staff {
        id: Uuid,
        name: String,
        role: StaffRole,
    },
    Patient {
        id: Uuid,
        name: String,
    },
}

impl Actor {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Staff { id, .. } | Self::Patient { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Staff { name, .. } | Self::Patient { name, .. } => name,
        }
    }

    pub fn kind(&self) -> ActorKind {
        match self {
            Self::Staff { .. } => ActorKind::Staff,
            Self::Patient { .. } => ActorKind::Patient,
        }
    }

    pub fn role(&self) -> Option<StaffRole> {
        match self {
            Self::Staff { role, .. } => Some(*role),
            Self::Patient { .. } => None,
        }
    }

    /// True when the actor is staff holding one of the allowed roles.
    pub fn has_role(&self, allowed: &[StaffRole]) -> bool {
        match self.role() {
            Some(role) => allowed.contains(&role),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_allow_list() {
        let staff = Actor::Staff {
            id: Uuid::new_v4(),
            name: "Dr. Reyes".into(),
            role: StaffRole::Clinician,
        };
        assert!(staff.has_role(&[StaffRole::Admin, StaffRole::Clinician]));
        assert!(!staff.has_role(&[StaffRole::Admin]));

        let patient = Actor::Patient {
            id: Uuid::new_v4(),
            name: "Ana".into(),
        };
        assert!(!patient.has_role(&[StaffRole::Admin, StaffRole::Clinician]));
    }

    #[test]
    fn role_round_trips_through_db_string() {
        for role in [StaffRole::Admin, StaffRole::Clinician, StaffRole::Nurse, StaffRole::Staff] {
            assert_eq!(role.as_str().parse::<StaffRole>().unwrap(), role);
        }
        assert!("DOCTOR".parse::<StaffRole>().is_err());
    }
}
