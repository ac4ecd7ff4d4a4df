//! Declarative service specification
//!
//! A `Conf` describes a service independently of any init system's native
//! format. Each backend declares which optional fields it can represent via
//! `FieldSupport`; validation fails naming the first populated field the
//! backend cannot carry.

use std::collections::BTreeMap;

use crate::errors::{Error, Result};

/// Backend-independent description of a service.
///
/// `env` and `limit` use `BTreeMap` so serialized output is deterministic
/// regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conf {
    /// Human-readable description. Required.
    pub desc: String,
    /// Command line to execute. Required.
    pub cmd: String,
    /// Environment variables set for the service process.
    pub env: BTreeMap<String, String>,
    /// Resource limits, keyed by limit name (e.g. "nofile").
    pub limit: BTreeMap<String, String>,
    /// Log destination hint (e.g. "syslog"). Empty means default.
    pub out: String,
    /// Shell fragment run before the command (host-specific tuning).
    pub extra_script: String,
}

/// Which optional `Conf` fields a backend can represent.
#[derive(Debug, Clone, Copy)]
pub struct FieldSupport {
    pub env: bool,
    pub limit: bool,
    pub out: bool,
    pub extra_script: bool,
}

impl FieldSupport {
    /// Every optional field supported.
    pub const FULL: FieldSupport = FieldSupport {
        env: true,
        limit: true,
        out: true,
        extra_script: true,
    };

    /// Only the required fields (desc, cmd) supported.
    pub const MINIMAL: FieldSupport = FieldSupport {
        env: false,
        limit: false,
        out: false,
        extra_script: false,
    };
}

impl Conf {
    /// Check required fields and reject populated fields outside `support`.
    ///
    /// Required-field violations are `NotValid`; a populated unsupported
    /// field is `NotSupported` naming that field.
    pub fn validate(&self, name: &str, support: &FieldSupport) -> Result<()> {
        if self.desc.is_empty() {
            return Err(Error::NotValid(format!(
                "conf.Desc for service {name:?} (missing)"
            )));
        }
        if self.cmd.is_empty() {
            return Err(Error::NotValid(format!(
                "conf.Cmd for service {name:?} (missing)"
            )));
        }

        if !self.env.is_empty() && !support.env {
            return Err(Error::NotSupported("Env".into()));
        }
        if !self.limit.is_empty() && !support.limit {
            return Err(Error::NotSupported("Limit".into()));
        }
        if !self.out.is_empty() && !support.out {
            return Err(Error::NotSupported("Out".into()));
        }
        if !self.extra_script.is_empty() && !support.extra_script {
            return Err(Error::NotSupported("ExtraScript".into()));
        }

        Ok(())
    }
}
