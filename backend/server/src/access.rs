//! # Access Guard
//!
//! Decides whether a caller may touch a patient report.
//!
//! - Admin: everything
//! - Doctor: everything, on any patient's report
//! - Patient: only reports they own
//!
//! The caller always comes from a verified session token, never from a request body.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Doctor,
    Patient,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Doctor => "doctor",
            Role::Patient => "patient",
        }
    }

    pub fn is_staff(self) -> bool {
        match self {
            Role::Admin | Role::Doctor => true,
            Role::Patient => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "doctor" => Ok(Role::Doctor),
            "patient" => Ok(Role::Patient),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

/// Authenticated identity of whoever issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: u64,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

pub fn authorize(caller: &Caller, resource_owner_id: u64, operation: Operation) -> Decision {
    match (caller.role, operation) {
        (Role::Admin, _) | (Role::Doctor, _) => Decision::Allow,
        (Role::Patient, _) if caller.id == resource_owner_id => Decision::Allow,
        (Role::Patient, _) => Decision::Deny,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_OPS: [Operation; 4] = [
        Operation::Create,
        Operation::Read,
        Operation::Update,
        Operation::Delete,
    ];

    #[test]
    fn test_admin_allowed_everything() {
        let admin = Caller {
            id: 1,
            role: Role::Admin,
        };

        for op in ALL_OPS {
            assert_eq!(authorize(&admin, 42, op), Decision::Allow);
        }
    }

    #[test]
    fn test_doctor_allowed_any_report() {
        let doctor = Caller {
            id: 2,
            role: Role::Doctor,
        };

        for op in ALL_OPS {
            assert!(authorize(&doctor, 99, op).is_allowed());
        }
    }

    #[test]
    fn test_patient_own_reports_only() {
        let patient = Caller {
            id: 7,
            role: Role::Patient,
        };

        for op in ALL_OPS {
            assert_eq!(authorize(&patient, 7, op), Decision::Allow);
            assert_eq!(authorize(&patient, 8, op), Decision::Deny);
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(" Doctor ".parse::<Role>(), Ok(Role::Doctor));
        assert_eq!("PATIENT".parse::<Role>(), Ok(Role::Patient));
        assert_eq!(
            "nurse".parse::<Role>(),
            Err(UnknownRole("nurse".to_string()))
        );
        assert_eq!(
            UnknownRole("nurse".to_string()).to_string(),
            "unknown role: nurse"
        );
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn test_staff_roles() {
        assert!(Role::Admin.is_staff());
        assert!(Role::Doctor.is_staff());
        assert!(!Role::Patient.is_staff());
    }
}
