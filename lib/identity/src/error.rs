//! Error types for the identity crate.
//!
//! - `DirectoryError`: storage failures, reported through rootcause by the
//!   directory and session store traits
//! - `BackendError`: reasons a set of verified claims did not produce a user

use std::fmt;

/// Errors from user directory and session store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// A uniqueness constraint was violated (username or keycloak_id).
    Conflict { field: &'static str, value: String },
    /// The record to update does not exist.
    NotFound { id: String },
    /// The storage backend failed.
    Storage { details: String },
    /// A stored row could not be decoded.
    Decode { details: String },
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { field, value } => {
                write!(f, "{field} '{value}' is already taken")
            }
            Self::NotFound { id } => write!(f, "record '{id}' not found"),
            Self::Storage { details } => write!(f, "storage error: {details}"),
            Self::Decode { details } => write!(f, "failed to decode stored record: {details}"),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// Errors from the authentication backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The claims did not pass verification (e.g. the `email` claim is missing).
    ClaimsRejected { reason: String },
    /// The claims carry no `sub` and the policy is to reject such logins.
    MissingSubject,
    /// More than one user matched the claims.
    MultipleUsers { count: usize },
    /// The user directory failed.
    Directory { details: String },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClaimsRejected { reason } => write!(f, "claims rejected: {reason}"),
            Self::MissingSubject => write!(f, "missing required claim: sub"),
            Self::MultipleUsers { count } => {
                write!(f, "multiple users returned ({count}) for one identity")
            }
            Self::Directory { details } => write!(f, "user directory error: {details}"),
        }
    }
}

impl std::error::Error for BackendError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_names_field_and_value() {
        let err = DirectoryError::Conflict {
            field: "keycloak_id",
            value: "sub-1".to_string(),
        };
        assert_eq!(err.to_string(), "keycloak_id 'sub-1' is already taken");
    }

    #[test]
    fn missing_subject_names_claim() {
        assert!(BackendError::MissingSubject.to_string().contains("sub"));
    }

    #[test]
    fn multiple_users_reports_count() {
        let err = BackendError::MultipleUsers { count: 3 };
        assert!(err.to_string().contains("multiple users"));
        assert!(err.to_string().contains('3'));
    }
}
