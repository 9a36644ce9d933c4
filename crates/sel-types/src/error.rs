//! Selector status codes and error taxonomy.
//!
//! Internally every operation returns [`SelResult`]; the integer
//! [`SelStatus`] form exists for the update-callback ABI and for
//! collaborators that report plain status codes.

use std::fmt;
use thiserror::Error;

/// Status codes exchanged with external collaborators.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelStatus {
    Success = 0,
    NotFound = -1,
    AlreadyExists = -2,
    NoSpace = -3,
    InvalidArgument = -4,
    ReferencesExist = -5,
    ResourceExhausted = -6,
    Unexpected = -7,
    CollaboratorFailure = -8,
}

impl SelStatus {
    /// Creates a status from a raw i32 value.
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => SelStatus::Success,
            -1 => SelStatus::NotFound,
            -2 => SelStatus::AlreadyExists,
            -3 => SelStatus::NoSpace,
            -4 => SelStatus::InvalidArgument,
            -5 => SelStatus::ReferencesExist,
            -6 => SelStatus::ResourceExhausted,
            -7 => SelStatus::Unexpected,
            _ => SelStatus::CollaboratorFailure,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == SelStatus::Success
    }

    /// Converts to a Result, returning Ok(()) for success.
    pub fn into_result(self) -> SelResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(SelError::from_status(self))
        }
    }
}

impl fmt::Display for SelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SelStatus::Success => "SEL_STATUS_SUCCESS",
            SelStatus::NotFound => "SEL_STATUS_NOT_FOUND",
            SelStatus::AlreadyExists => "SEL_STATUS_ALREADY_EXISTS",
            SelStatus::NoSpace => "SEL_STATUS_NO_SPACE",
            SelStatus::InvalidArgument => "SEL_STATUS_INVALID_ARGUMENT",
            SelStatus::ReferencesExist => "SEL_STATUS_REFERENCES_EXIST",
            SelStatus::ResourceExhausted => "SEL_STATUS_RESOURCE_EXHAUSTED",
            SelStatus::Unexpected => "SEL_STATUS_UNEXPECTED",
            SelStatus::CollaboratorFailure => "SEL_STATUS_COLLABORATOR_FAILURE",
        };
        write!(f, "{}", s)
    }
}

/// Error type for selector table operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelError {
    #[error("Not found: {item}")]
    NotFound { item: String },

    #[error("Already exists: {item}")]
    AlreadyExists { item: String },

    /// A word or action-table allocator has no room left.
    #[error("No space: {resource}")]
    NoSpace { resource: String },

    /// Size, action-function or ordering violation.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The last active member of a referenced group cannot go away.
    #[error("References exist: {object}")]
    ReferencesExist { object: String },

    #[error("Resource exhausted: {resource}")]
    ResourceExhausted { resource: String },

    /// Internal invariant violation. Not recoverable.
    #[error("Unexpected internal state: {message}")]
    Unexpected { message: String },

    #[error("Collaborator {collaborator} failed: {status}")]
    Collaborator {
        collaborator: String,
        status: SelStatus,
    },
}

impl SelError {
    /// Creates an error from a status code.
    pub fn from_status(status: SelStatus) -> Self {
        match status {
            SelStatus::Success => SelError::Unexpected {
                message: "from_status called with success status".to_string(),
            },
            SelStatus::NotFound => SelError::not_found("unknown"),
            SelStatus::AlreadyExists => SelError::already_exists("unknown"),
            SelStatus::NoSpace => SelError::no_space("unknown"),
            SelStatus::InvalidArgument => SelError::invalid_argument(format!("status {}", status)),
            SelStatus::ReferencesExist => SelError::references_exist("unknown"),
            SelStatus::ResourceExhausted => SelError::ResourceExhausted {
                resource: "unknown".to_string(),
            },
            SelStatus::Unexpected => SelError::unexpected(format!("status {}", status)),
            SelStatus::CollaboratorFailure => SelError::Collaborator {
                collaborator: "unknown".to_string(),
                status,
            },
        }
    }

    pub fn not_found(item: impl Into<String>) -> Self {
        SelError::NotFound { item: item.into() }
    }

    pub fn already_exists(item: impl Into<String>) -> Self {
        SelError::AlreadyExists { item: item.into() }
    }

    pub fn no_space(resource: impl Into<String>) -> Self {
        SelError::NoSpace {
            resource: resource.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        SelError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn references_exist(object: impl Into<String>) -> Self {
        SelError::ReferencesExist {
            object: object.into(),
        }
    }

    pub fn exhausted(resource: impl Into<String>) -> Self {
        SelError::ResourceExhausted {
            resource: resource.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        SelError::Unexpected {
            message: message.into(),
        }
    }

    pub fn collaborator(collaborator: impl Into<String>, status: SelStatus) -> Self {
        SelError::Collaborator {
            collaborator: collaborator.into(),
            status,
        }
    }

    /// Returns the status code reported for this error.
    pub fn status(&self) -> SelStatus {
        match self {
            SelError::NotFound { .. } => SelStatus::NotFound,
            SelError::AlreadyExists { .. } => SelStatus::AlreadyExists,
            SelError::NoSpace { .. } => SelStatus::NoSpace,
            SelError::InvalidArgument { .. } => SelStatus::InvalidArgument,
            SelError::ReferencesExist { .. } => SelStatus::ReferencesExist,
            SelError::ResourceExhausted { .. } => SelStatus::ResourceExhausted,
            SelError::Unexpected { .. } => SelStatus::Unexpected,
            SelError::Collaborator { status, .. } => *status,
        }
    }

    /// Returns true if the error leaves the table in an unknown state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SelError::Unexpected { .. })
    }
}

/// Result type for selector table operations.
pub type SelResult<T> = Result<T, SelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_raw() {
        assert_eq!(SelStatus::from_raw(0), SelStatus::Success);
        assert_eq!(SelStatus::from_raw(-3), SelStatus::NoSpace);
        assert_eq!(SelStatus::from_raw(-99), SelStatus::CollaboratorFailure);
    }

    #[test]
    fn test_status_into_result() {
        assert!(SelStatus::Success.into_result().is_ok());
        let err = SelStatus::ReferencesExist.into_result().unwrap_err();
        assert_eq!(err.status(), SelStatus::ReferencesExist);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(SelError::not_found("grp").status(), SelStatus::NotFound);
        assert_eq!(SelError::no_space("stage 2").status(), SelStatus::NoSpace);
        assert_eq!(
            SelError::collaborator("shadow", SelStatus::Unexpected).status(),
            SelStatus::Unexpected
        );
        assert!(SelError::unexpected("bad locator").is_fatal());
        assert!(!SelError::invalid_argument("size").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = SelError::references_exist("group 0x4");
        assert_eq!(err.to_string(), "References exist: group 0x4");
    }
}
