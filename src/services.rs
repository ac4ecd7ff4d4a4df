//! Agent-facing service management facade
//!
//! Combines the conf registry with the host's init system and layers
//! ownership semantics on top: every mutating operation first proves the
//! named service is managed by this agent, and idempotent outcomes
//! (starting a running service, stopping a stopped one) are absorbed
//! rather than surfaced as errors.

use std::path::Path;

use crate::conf::Conf;
use crate::errors::{Error, Result};
use crate::initsystems::{InitSystem, Status};
use crate::registry::{ConfDir, ServiceConfigs};

/// List only services the init system reports as running.
pub const DIRECTIVE_RUNNING: &str = "running";
/// Skip the managed-conf verification while listing.
pub const DIRECTIVE_NOVERIFY: &str = "noverify";

/// Name prefixes that mark a service as potentially agent-owned.
pub const AGENT_PREFIXES: &[&str] = &["agent-", "agentd-"];

/// High-level manager for the services this agent owns.
pub struct Services {
    configs: ServiceConfigs,
    init: Box<dyn InitSystem>,
}

impl Services {
    /// Build a facade over `init` with its registry rooted at `data_dir`,
    /// restricted to the default agent name prefixes.
    pub fn new(data_dir: &Path, init: Box<dyn InitSystem>) -> Result<Self> {
        Self::with_prefixes(data_dir, init, AGENT_PREFIXES)
    }

    pub fn with_prefixes(
        data_dir: &Path,
        init: Box<dyn InitSystem>,
        prefixes: &[&str],
    ) -> Result<Self> {
        let mut configs = ServiceConfigs::new(data_dir, init.name(), prefixes);
        configs.refresh(init.as_ref())?;
        Ok(Self { configs, init })
    }

    /// The name of the underlying init system.
    pub fn init_name(&self) -> &str {
        self.init.name()
    }

    /// Names of all managed services, narrowed by `directives`.
    ///
    /// `DIRECTIVE_RUNNING` keeps only services the init system reports as
    /// running; adding `DIRECTIVE_NOVERIFY` skips the per-service conf
    /// verification that otherwise drops services whose enabled conf no
    /// longer matches ours. Unknown directives are rejected.
    pub fn list(&self, directives: &[&str]) -> Result<Vec<String>> {
        let mut running_only = false;
        let mut verify = true;
        for directive in directives {
            match *directive {
                DIRECTIVE_RUNNING => running_only = true,
                DIRECTIVE_NOVERIFY => verify = false,
                unknown => {
                    return Err(Error::NotValid(format!("list directive {unknown:?}")));
                }
            }
        }

        if !running_only {
            return Ok(self.configs.names().to_vec());
        }

        let names = self.init.list(self.configs.names())?;
        let mut running = Vec::new();
        for name in names {
            let info = self.init.info(&name)?;
            if info.status != Status::Running {
                continue;
            }
            if verify && !self.filter_keeps(&name)? {
                continue;
            }
            running.push(name);
        }
        Ok(running)
    }

    /// Whether `name` survives list verification: enabled with a conf that
    /// still matches the managed one. A conflicting conf means the service
    /// is no longer ours and is silently dropped.
    fn filter_keeps(&self, name: &str) -> Result<bool> {
        let Some(conf_dir) = self.configs.lookup(name) else {
            return Ok(false);
        };
        match self.verified_enabled(name, &conf_dir) {
            Ok(enabled) => Ok(enabled),
            Err(err) if err.is_not_managed() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Start the named managed service. A service that is already running
    /// is success; a service that is not enabled is an error.
    pub fn start(&self, name: &str) -> Result<()> {
        self.ensure_managed(name)?;
        match self.init.start(name) {
            Err(err) if err.is_already_exists() => {
                log::debug!("service {name} already running");
                Ok(())
            }
            Err(err) if err.is_not_found() => Err(Error::NotEnabled(name.to_string())),
            other => other,
        }
    }

    /// Stop the named managed service. A service that is not running (or
    /// not enabled at all) is success.
    pub fn stop(&self, name: &str) -> Result<()> {
        self.ensure_managed(name)?;
        match self.init.stop(name) {
            Err(err) if err.is_not_found() => {
                log::debug!("service {name} already stopped");
                Ok(())
            }
            other => other,
        }
    }

    pub fn is_running(&self, name: &str) -> Result<bool> {
        self.ensure_managed(name)?;
        match self.init.info(name) {
            Ok(info) => Ok(info.status == Status::Running),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Enable the named managed service with the init system. Already
    /// enabled with our conf is success; already enabled with a different
    /// conf is a conflict.
    pub fn enable(&self, name: &str) -> Result<()> {
        let Some(conf_dir) = self.configs.lookup(name) else {
            return Err(Error::NotFound(name.to_string()));
        };

        match self.init.enable(name, conf_dir.conf_path()) {
            Err(err) if err.is_already_exists() => {
                self.verified_enabled(name, &conf_dir).map(|_| ())
            }
            other => other,
        }
    }

    /// Disable the named managed service. Not enabled is success.
    pub fn disable(&self, name: &str) -> Result<()> {
        self.ensure_managed(name)?;
        match self.init.disable(name) {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        self.ensure_managed(name)?;
        self.init.is_enabled(name)
    }

    /// Record `conf` for `name` in the registry. The service is not
    /// enabled or started; `AlreadyExists` if the name is already managed.
    pub fn add(&mut self, name: &str, conf: &Conf) -> Result<()> {
        self.configs.add(name, conf, self.init.as_ref())
    }

    /// Forget the named service and, if it is enabled with our conf, stop
    /// and disable it. Removing an unmanaged name is a no-op.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let Some(conf_dir) = self.configs.lookup(name) else {
            return Ok(());
        };

        let mut ours = self.init.is_enabled(name)?;
        if ours {
            ours = match self.compare_conf(name, &conf_dir) {
                Ok(same) => same,
                // Can't verify, so assume ownership and tear down.
                Err(err) if err.is_not_supported() => true,
                Err(err) => return Err(err),
            };
        }

        self.configs.remove(name)?;

        if ours {
            match self.init.stop(name) {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
            match self.init.disable(name) {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Whether `conf` matches what the registry holds for `name`, after
    /// the same normalization `add` applies. `NotFound` if unmanaged.
    pub fn check(&self, name: &str, conf: &Conf) -> Result<bool> {
        let Some(conf_dir) = self.configs.lookup(name) else {
            return Err(Error::NotFound(name.to_string()));
        };

        let stored = self.init.deserialize(&conf_dir.read_conf()?)?;
        let (candidate, _) = conf_dir.normalize(conf);
        Ok(stored == candidate)
    }

    pub fn is_managed(&self, name: &str) -> bool {
        self.configs.lookup(name).is_some()
    }

    /// Proof of ownership required before mutating a service: the name
    /// must be in the registry and, if enabled, the enabled conf must
    /// still be ours.
    fn ensure_managed(&self, name: &str) -> Result<()> {
        let Some(conf_dir) = self.configs.lookup(name) else {
            return Err(Error::NotFound(name.to_string()));
        };
        self.verified_enabled(name, &conf_dir).map(|_| ())
    }

    /// Whether `name` is enabled with the conf we manage. Enabled with a
    /// different conf is `NotManaged`; a conf the backend cannot fully
    /// round-trip is trusted as ours.
    fn verified_enabled(&self, name: &str, conf_dir: &ConfDir) -> Result<bool> {
        if !self.init.is_enabled(name)? {
            return Ok(false);
        }
        match self.compare_conf(name, conf_dir) {
            Ok(true) => Ok(true),
            Ok(false) => Err(Error::NotManaged(name.to_string())),
            Err(err) if err.is_not_supported() => Ok(true),
            Err(err) => Err(err),
        }
    }

    /// Compare the init system's enabled conf for `name` against the
    /// registry's copy.
    fn compare_conf(&self, name: &str, conf_dir: &ConfDir) -> Result<bool> {
        let actual = self.init.conf(name)?;
        let expected = self.init.deserialize(&conf_dir.read_conf()?)?;
        Ok(actual == expected)
    }
}
