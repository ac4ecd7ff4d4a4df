//! systemd adapter
//!
//! Lifecycle operations go over the org.freedesktop.systemd1 D-Bus API.
//! Start/stop enqueue a job and block on its JobRemoved signal; the wait is
//! bounded by the configured job timeout. Enablement links the managed unit
//! file into the unit search path.

mod dbus;
pub mod unit;

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_lite::StreamExt;

use crate::conf::Conf;
use crate::errors::{Error, Result};
use crate::initsystems::{
    ensure_status, filter_names, InitSystem, ServiceInfo, Status, StatusQuery,
};
use dbus::{SystemdManagerProxy, UnitStatus};

/// Explicit adapter configuration; no process-wide defaults.
#[derive(Debug, Clone)]
pub struct SystemdOptions {
    /// Upper bound on the wait for a start/stop job to complete.
    pub job_timeout: Duration,
    /// Directory linked unit files appear under.
    pub unit_dir: PathBuf,
}

impl Default for SystemdOptions {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(60),
            unit_dir: PathBuf::from("/etc/systemd/system"),
        }
    }
}

pub struct Systemd {
    options: SystemdOptions,
    rt: tokio::runtime::Runtime,
    conn: zbus::Connection,
}

fn unit_name(name: &str) -> String {
    format!("{name}.service")
}

/// Translate a unit's load/active state into the shared status set.
fn map_active_state(load_state: &str, active_state: &str) -> Status {
    if load_state != "loaded" {
        return Status::Error;
    }
    match active_state {
        "active" => Status::Running,
        "reloading" | "activating" => Status::Starting,
        "deactivating" => Status::Stopping,
        // "inactive", "failed", and anything unmapped
        _ => Status::Stopped,
    }
}

impl Systemd {
    /// Connect to the system bus. Blocking D-Bus calls run on an internal
    /// current-thread runtime.
    pub fn new(options: SystemdOptions) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let conn = rt.block_on(zbus::Connection::system())?;
        Ok(Self { options, rt, conn })
    }

    fn list_units(&self) -> Result<Vec<UnitStatus>> {
        self.rt.block_on(async {
            let proxy = SystemdManagerProxy::new(&self.conn).await?;
            Ok(proxy.list_units().await?)
        })
    }

    /// Enqueue a start/stop job and wait for its JobRemoved result.
    fn run_job(&self, op: &'static str, name: &str) -> Result<()> {
        let unit = unit_name(name);
        let timeout = self.options.job_timeout;

        let result: String = self.rt.block_on(async {
            let proxy = SystemdManagerProxy::new(&self.conn).await?;
            proxy.subscribe().await?;
            let mut removed = proxy.receive_job_removed().await?;

            let job = match op {
                "start" => proxy.start_unit(&unit, "fail").await?,
                _ => proxy.stop_unit(&unit, "fail").await?,
            };

            let wait = async {
                while let Some(signal) = removed.next().await {
                    let args = signal.args()?;
                    if args.job().as_str() == job.as_str() {
                        return Ok::<String, Error>(args.result().to_string());
                    }
                }
                Err(Error::OperationFailed(op, name.to_string()))
            };

            match tokio::time::timeout(timeout, wait).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout(
                    timeout,
                    format!("{op} job for service {name:?}"),
                )),
            }
        })?;

        if result != "done" {
            log::warn!("{op} job for {name} finished with result {result:?}");
            return Err(Error::OperationFailed(op, name.to_string()));
        }
        Ok(())
    }
}

impl StatusQuery for Systemd {
    fn info(&self, name: &str) -> Result<ServiceInfo> {
        let unit = unit_name(name);
        for status in self.list_units()? {
            if status.name == unit {
                return Ok(ServiceInfo {
                    name: name.to_string(),
                    description: status.description,
                    status: map_active_state(&status.load_state, &status.active_state),
                });
            }
        }
        Err(Error::NotFound(name.to_string()))
    }
}

impl InitSystem for Systemd {
    fn name(&self) -> &str {
        "systemd"
    }

    fn list(&self, include: &[String]) -> Result<Vec<String>> {
        let names = self
            .list_units()?
            .into_iter()
            .filter_map(|u| u.name.strip_suffix(".service").map(str::to_string))
            .collect();
        Ok(filter_names(names, include))
    }

    fn start(&self, name: &str) -> Result<()> {
        ensure_status(self, name, Status::Stopped)?;
        log::info!("starting service {name}");
        self.run_job("start", name)
    }

    fn stop(&self, name: &str) -> Result<()> {
        ensure_status(self, name, Status::Running)?;
        log::info!("stopping service {name}");
        self.run_job("stop", name)
    }

    fn enable(&self, name: &str, conf_path: &Path) -> Result<()> {
        ensure_status(self, name, Status::Disabled)?;

        let file = conf_path.to_string_lossy().into_owned();
        log::info!("enabling service {name} from {file}");
        self.rt.block_on(async {
            let proxy = SystemdManagerProxy::new(&self.conn).await?;
            proxy.link_unit_files(&[file.as_str()], false, true).await?;
            let (carries_install_info, _) =
                proxy.enable_unit_files(&[file.as_str()], false, true).await?;
            if !carries_install_info {
                log::debug!("unit file for {name} carries no install info");
            }
            proxy.reload().await?;
            Ok(())
        })
    }

    fn disable(&self, name: &str) -> Result<()> {
        ensure_status(self, name, Status::Enabled)?;

        let unit = unit_name(name);
        log::info!("disabling service {name}");
        self.rt.block_on(async {
            let proxy = SystemdManagerProxy::new(&self.conn).await?;
            proxy.disable_unit_files(&[unit.as_str()], false).await?;
            proxy.reload().await?;
            Ok(())
        })
    }

    fn is_enabled(&self, name: &str) -> Result<bool> {
        let names = self.list(std::slice::from_ref(&name.to_string()))?;
        Ok(!names.is_empty())
    }

    fn conf(&self, name: &str) -> Result<Conf> {
        ensure_status(self, name, Status::Enabled)?;

        let path = self.options.unit_dir.join(unit_name(name));
        let data = std::fs::read(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(name.to_string())
            } else {
                Error::Io(err)
            }
        })?;
        unit::deserialize(&data)
    }

    fn validate(&self, name: &str, conf: &Conf) -> Result<()> {
        unit::validate(name, conf)
    }

    fn serialize(&self, name: &str, conf: &Conf) -> Result<Vec<u8>> {
        unit::serialize(name, conf)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Conf> {
        unit::deserialize(data)
    }
}
