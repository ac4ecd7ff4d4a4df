//! Init-system capability contract
//!
//! One uniform operation set over whatever native supervision facility the
//! host runs (systemd, upstart, Windows service control). Adapters translate
//! `Conf` to and from their native persisted format and perform native
//! lifecycle operations; feature gaps surface as explicit `NotSupported`
//! errors rather than silently dropped configuration.

pub mod systemd;
pub mod upstart;
pub mod windows;

use std::path::Path;

use crate::conf::Conf;
use crate::errors::{Error, Result};

/// Closed status set shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Enabled,
    Disabled,
    Running,
    Starting,
    Stopping,
    Stopped,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Running => "running",
            Self::Starting => "starting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor returned by `info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub description: String,
    pub status: Status,
}

/// Minimal capability needed by the shared precondition helper.
///
/// Kept separate from `InitSystem` so `ensure_status` can be reused by
/// anything able to answer a status query, without the full contract.
pub trait StatusQuery: Send {
    /// Gather information about the named service. `NotFound` if the
    /// service is not enabled.
    fn info(&self, name: &str) -> Result<ServiceInfo>;
}

/// The functionality provided by an init system. It covers all services on
/// the host, not just agent-managed ones.
pub trait InitSystem: StatusQuery {
    /// The backend's name ("systemd", "upstart", "windows").
    fn name(&self) -> &str;

    /// Names of all services known to the init system, limited to `include`
    /// when it is non-empty.
    fn list(&self, include: &[String]) -> Result<Vec<String>>;

    /// Start the named service. `AlreadyExists` if already running,
    /// `NotFound` if not enabled.
    fn start(&self, name: &str) -> Result<()>;

    /// Stop the named service. `NotFound` if not running or not enabled.
    fn stop(&self, name: &str) -> Result<()>;

    /// Add the service to the init system using the conf file at
    /// `conf_path`. `AlreadyExists` if a service with that name is enabled.
    fn enable(&self, name: &str, conf_path: &Path) -> Result<()>;

    /// Remove the named service from the init system. `NotFound` if it is
    /// not enabled.
    fn disable(&self, name: &str) -> Result<()>;

    /// Whether the named service is enabled.
    fn is_enabled(&self, name: &str) -> Result<bool>;

    /// Compose the `Conf` for the named enabled service.
    fn conf(&self, name: &str) -> Result<Conf>;

    /// Check that `conf` is compatible with this init system.
    /// `NotSupported` names the offending field; anything else invalid is
    /// `NotValid`.
    fn validate(&self, name: &str, conf: &Conf) -> Result<()>;

    /// Render `conf` in the backend's native persisted format.
    /// Validates first.
    fn serialize(&self, name: &str, conf: &Conf) -> Result<Vec<u8>>;

    /// Parse native-format data back into a `Conf`, validating the result.
    fn deserialize(&self, data: &[u8]) -> Result<Conf>;
}

/// Shared precondition check for lifecycle operations.
///
/// Queries `info` and maps any mismatch with `target` into the error kind
/// the contract's state table requires. `Status::Enabled` only requires the
/// service to be enabled, whatever its run state.
pub fn ensure_status(init: &dyn StatusQuery, name: &str, target: Status) -> Result<()> {
    let info = init.info(name);

    if target == Status::Disabled {
        return match info {
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
            Ok(_) => Err(Error::AlreadyExists(name.to_string())),
        };
    }

    let info = info?;
    if target == Status::Enabled || info.status == target {
        return Ok(());
    }

    match target {
        // Must be stopped before starting: already running.
        Status::Stopped => Err(Error::AlreadyExists(name.to_string())),
        // Must be running before stopping (and anything else unexpected).
        _ => Err(Error::NotFound(name.to_string())),
    }
}

/// Filter `names` down to those present in `include`. An empty include
/// list means no filtering.
pub fn filter_names(names: Vec<String>, include: &[String]) -> Vec<String> {
    if include.is_empty() {
        return names;
    }
    names
        .into_iter()
        .filter(|n| include.iter().any(|i| i == n))
        .collect()
}

/// The init systems this agent knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSystemKind {
    Systemd,
    Upstart,
    Windows,
}

impl InitSystemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Systemd => "systemd",
            Self::Upstart => "upstart",
            Self::Windows => "windows",
        }
    }

    /// Determine which init system is running on this host.
    #[cfg(windows)]
    pub fn detect() -> Result<InitSystemKind> {
        Ok(InitSystemKind::Windows)
    }

    /// Determine which init system is running on this host by inspecting
    /// what PID 1 was executed as.
    #[cfg(not(windows))]
    pub fn detect() -> Result<InitSystemKind> {
        let data = std::fs::read("/proc/1/cmdline")?;
        let exe = data.split(|b| *b == 0).next().unwrap_or_default();
        Self::from_init_executable(&String::from_utf8_lossy(exe))
    }

    /// Map the path PID 1 was executed as to an init system.
    pub fn from_init_executable(exe: &str) -> Result<InitSystemKind> {
        let base = Path::new(exe)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match base.as_str() {
            "systemd" => Ok(InitSystemKind::Systemd),
            "init" | "upstart" => Ok(InitSystemKind::Upstart),
            _ => Err(Error::NotValid(format!("init executable {exe:?}"))),
        }
    }
}

/// Build an adapter for `kind` with default options.
pub fn new_init_system(kind: InitSystemKind) -> Result<Box<dyn InitSystem>> {
    match kind {
        InitSystemKind::Systemd => Ok(Box::new(systemd::Systemd::new(
            systemd::SystemdOptions::default(),
        )?)),
        InitSystemKind::Upstart => Ok(Box::new(upstart::Upstart::new(
            upstart::UpstartOptions::default(),
        ))),
        InitSystemKind::Windows => Ok(Box::new(windows::WindowsServices::new(
            windows::WindowsOptions::default(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedInfo(Result<ServiceInfo>);

    impl StatusQuery for FixedInfo {
        fn info(&self, _name: &str) -> Result<ServiceInfo> {
            match &self.0 {
                Ok(info) => Ok(info.clone()),
                Err(Error::NotFound(n)) => Err(Error::NotFound(n.clone())),
                Err(_) => Err(Error::Parse("broken".into())),
            }
        }
    }

    fn info_with(status: Status) -> FixedInfo {
        FixedInfo(Ok(ServiceInfo {
            name: "svc".into(),
            description: "a service".into(),
            status,
        }))
    }

    fn not_enabled() -> FixedInfo {
        FixedInfo(Err(Error::NotFound("svc".into())))
    }

    #[test]
    fn test_ensure_status_disabled() {
        ensure_status(&not_enabled(), "svc", Status::Disabled).unwrap();

        let err = ensure_status(&info_with(Status::Stopped), "svc", Status::Disabled).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_ensure_status_enabled_any_run_state() {
        ensure_status(&info_with(Status::Stopped), "svc", Status::Enabled).unwrap();
        ensure_status(&info_with(Status::Running), "svc", Status::Enabled).unwrap();

        let err = ensure_status(&not_enabled(), "svc", Status::Enabled).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_ensure_status_stopped_for_start() {
        ensure_status(&info_with(Status::Stopped), "svc", Status::Stopped).unwrap();

        // Already running: starting again would be AlreadyExists.
        let err = ensure_status(&info_with(Status::Running), "svc", Status::Stopped).unwrap_err();
        assert!(err.is_already_exists());

        let err = ensure_status(&not_enabled(), "svc", Status::Stopped).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_ensure_status_running_for_stop() {
        ensure_status(&info_with(Status::Running), "svc", Status::Running).unwrap();

        let err = ensure_status(&info_with(Status::Stopped), "svc", Status::Running).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_filter_names() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(filter_names(names.clone(), &[]), names);
        assert_eq!(
            filter_names(names.clone(), &["b".to_string(), "z".to_string()]),
            vec!["b".to_string()]
        );
        assert!(filter_names(names, &["z".to_string()]).is_empty());
    }

    #[test]
    fn test_kind_from_init_executable() {
        assert_eq!(
            InitSystemKind::from_init_executable("/sbin/init").unwrap(),
            InitSystemKind::Upstart
        );
        assert_eq!(
            InitSystemKind::from_init_executable("/usr/lib/systemd/systemd").unwrap(),
            InitSystemKind::Systemd
        );
        assert!(InitSystemKind::from_init_executable("/bin/busybox").is_err());
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(Status::Running.as_str(), "running");
        assert_eq!(Status::Stopped.as_str(), "stopped");
        assert_eq!(Status::Enabled.as_str(), "enabled");
        assert_eq!(Status::Disabled.as_str(), "disabled");
        assert_eq!(Status::Starting.as_str(), "starting");
        assert_eq!(Status::Stopping.as_str(), "stopping");
        assert_eq!(Status::Error.as_str(), "error");
    }
}
