//! svcmgr - Service lifecycle management for cluster agents
//!
//! A Rust implementation that:
//! - Describes services declaratively (`Conf`) independent of any init system
//! - Drives systemd (over D-Bus), upstart, and Windows service control
//!   through one `InitSystem` contract
//! - Tracks agent ownership of services in an on-disk conf registry
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   Services                       │
//! ├──────────────────────┬──────────────────────────┤
//! │    Conf Registry     │    InitSystem contract   │
//! ├──────────────────────┴──────────────────────────┤
//! │     systemd      │    upstart    │    windows   │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod conf;
pub mod errors;
pub mod initsystems;
pub mod registry;
pub mod services;
pub mod shell;

// Re-exports for the common surface
pub use conf::{Conf, FieldSupport};
pub use errors::{Error, Result};
pub use initsystems::{
    new_init_system, InitSystem, InitSystemKind, ServiceInfo, Status, StatusQuery,
};
pub use services::{Services, DIRECTIVE_NOVERIFY, DIRECTIVE_RUNNING};
