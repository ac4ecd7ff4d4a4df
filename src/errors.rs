//! Error kinds shared across the crate
//!
//! The facade reinterprets `NotFound`/`AlreadyExists` coming back from an
//! init system into idempotence and conflict semantics, so callers matching
//! on kinds must use the predicate helpers rather than string inspection.

/// Error returned by init systems, the registry, and the services facade.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("service {0:?} not found")]
    NotFound(String),

    #[error("service {0:?} already exists")]
    AlreadyExists(String),

    #[error("{0} not valid")]
    NotValid(String),

    #[error("conf field {0:?} not supported by this init system")]
    NotSupported(String),

    #[error("service {0:?} is not managed by this agent")]
    NotManaged(String),

    #[error("service {0:?} not enabled")]
    NotEnabled(String),

    #[error("timed out after {0:?} waiting on {1}")]
    Timeout(std::time::Duration, String),

    #[error("command {cmd:?} failed: {detail}")]
    CommandFailed { cmd: String, detail: String },

    #[error("failed to {0} service {1:?}")]
    OperationFailed(&'static str, String),

    #[error("failed to parse conf: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    pub fn is_not_valid(&self) -> bool {
        matches!(self, Error::NotValid(_))
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, Error::NotSupported(_))
    }

    pub fn is_not_managed(&self) -> bool {
        matches!(self, Error::NotManaged(_))
    }

    pub fn is_not_enabled(&self) -> bool {
        matches!(self, Error::NotEnabled(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(..))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
