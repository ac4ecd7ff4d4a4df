//! upstart adapter
//!
//! Enablement is filesystem-based: a conf file symlinked into the init
//! directory under `<name>.conf` is the enablement signal. Lifecycle
//! control shells out to the `start`/`stop`/`status` tools; start retries a
//! bounded number of times because upstart can lag behind a freshly linked
//! conf file on slow disks.

use std::path::{Path, PathBuf};

use crate::conf::{Conf, FieldSupport};
use crate::errors::{Error, Result};
use crate::initsystems::{
    ensure_status, filter_names, InitSystem, ServiceInfo, Status, StatusQuery,
};
use crate::shell::{CmdRunner, RetryStrategy, SystemRunner};

pub const SUPPORT: FieldSupport = FieldSupport::FULL;

/// Explicit adapter configuration; no process-wide defaults.
#[derive(Debug, Clone)]
pub struct UpstartOptions {
    /// Directory holding the enabled conf files.
    pub init_dir: PathBuf,
    /// Retry policy for the start command.
    pub start_retries: RetryStrategy,
}

impl Default for UpstartOptions {
    fn default() -> Self {
        Self {
            init_dir: PathBuf::from("/etc/init"),
            start_retries: RetryStrategy::default(),
        }
    }
}

pub struct Upstart {
    options: UpstartOptions,
    runner: Box<dyn CmdRunner>,
}

impl Upstart {
    pub fn new(options: UpstartOptions) -> Self {
        Self::with_runner(options, Box::new(SystemRunner))
    }

    /// Construct with an injected command runner (used by tests).
    pub fn with_runner(options: UpstartOptions, runner: Box<dyn CmdRunner>) -> Self {
        Self { options, runner }
    }

    fn conf_path(&self, name: &str) -> PathBuf {
        self.options.init_dir.join(format!("{name}.conf"))
    }

    fn is_running(&self, name: &str) -> bool {
        // Any failure or unexpected output means "not running".
        match self.runner.run("status", &["--system", name]) {
            Ok(out) => String::from_utf8_lossy(&out).contains("start/running"),
            Err(_) => false,
        }
    }

    fn read_conf(&self, name: &str) -> Result<Conf> {
        let data = std::fs::read(self.conf_path(name)).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(name.to_string())
            } else {
                Error::Io(err)
            }
        })?;
        deserialize(&data)
    }
}

impl StatusQuery for Upstart {
    fn info(&self, name: &str) -> Result<ServiceInfo> {
        let conf = self.read_conf(name)?;

        let status = if self.is_running(name) {
            Status::Running
        } else {
            Status::Stopped
        };

        Ok(ServiceInfo {
            name: name.to_string(),
            description: conf.desc,
            status,
        })
    }
}

impl InitSystem for Upstart {
    fn name(&self) -> &str {
        "upstart"
    }

    fn list(&self, include: &[String]) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.options.init_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(name) = service_name_from_conf(&file_name.to_string_lossy()) {
                names.push(name);
            }
        }
        Ok(filter_names(names, include))
    }

    fn start(&self, name: &str) -> Result<()> {
        ensure_status(self, name, Status::Stopped)?;

        log::info!("starting service {name}");
        let retries = self.options.start_retries;
        retries.run(|| match self.runner.run("start", &["--system", name]) {
            Ok(_) => Ok(()),
            Err(err) => {
                // The service may have come up before our command ran.
                if self.is_running(name) {
                    return Ok(());
                }
                log::warn!("start of {name} failed, may retry: {err}");
                Err(err)
            }
        })
    }

    fn stop(&self, name: &str) -> Result<()> {
        ensure_status(self, name, Status::Running)?;

        log::info!("stopping service {name}");
        self.runner.run("stop", &["--system", name])?;
        Ok(())
    }

    fn enable(&self, name: &str, conf_path: &Path) -> Result<()> {
        if self.is_enabled(name)? {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        log::info!("enabling service {name} from {}", conf_path.display());
        symlink(conf_path, &self.conf_path(name))?;
        Ok(())
    }

    fn disable(&self, name: &str) -> Result<()> {
        ensure_status(self, name, Status::Enabled)?;

        log::info!("disabling service {name}");
        std::fs::remove_file(self.conf_path(name))?;
        Ok(())
    }

    fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.conf_path(name).exists())
    }

    fn conf(&self, name: &str) -> Result<Conf> {
        self.read_conf(name)
    }

    fn validate(&self, name: &str, conf: &Conf) -> Result<()> {
        validate(name, conf)
    }

    fn serialize(&self, name: &str, conf: &Conf) -> Result<Vec<u8>> {
        serialize(name, conf)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Conf> {
        deserialize(data)
    }
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(not(unix))]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dst).map(|_| ())
}

/// `<name>.conf` with a well-formed name, or nothing.
fn service_name_from_conf(file_name: &str) -> Option<String> {
    let name = file_name.strip_suffix(".conf")?;
    if name.is_empty() {
        return None;
    }
    let well_formed = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'));
    well_formed.then(|| name.to_string())
}

/// Check `conf` against what an upstart conf can express. Every field is
/// representable.
pub fn validate(name: &str, conf: &Conf) -> Result<()> {
    conf.validate(name, &SUPPORT)
}

/// Render `conf` as upstart conf text. Validates first.
pub fn serialize(name: &str, conf: &Conf) -> Result<Vec<u8>> {
    validate(name, conf)?;

    let mut out = String::new();
    out.push_str(&format!("description \"{}\"\n", conf.desc));
    out.push_str("start on runlevel [2345]\n");
    out.push_str("stop on runlevel [!2345]\n");
    out.push_str("respawn\n");
    out.push_str("normal exit 0\n");
    for (k, v) in &conf.env {
        out.push_str(&format!("env {k}=\"{v}\"\n"));
    }
    for (k, v) in &conf.limit {
        out.push_str(&format!("limit {k} {v}\n"));
    }
    out.push_str("script\n");
    if !conf.extra_script.is_empty() {
        for line in conf.extra_script.lines() {
            out.push_str(&format!("  {line}\n"));
        }
    }
    out.push_str(&format!("  exec {}", conf.cmd));
    if !conf.out.is_empty() {
        out.push_str(&format!(" >> {} 2>&1", conf.out));
    }
    out.push('\n');
    out.push_str("end script\n");

    Ok(out.into_bytes())
}

/// Parse upstart conf text back into a `Conf`, validating the result.
pub fn deserialize(data: &[u8]) -> Result<Conf> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::Parse("conf file is not valid UTF-8".to_string()))?;

    let mut conf = Conf::default();
    let mut in_script = false;
    let mut script_lines: Vec<String> = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();

        if in_script {
            if line == "end script" {
                in_script = false;
            } else if let Some(exec) = line.strip_prefix("exec ") {
                let (cmd, out) = split_exec_redirect(exec);
                conf.cmd = cmd.to_string();
                conf.out = out.map(str::to_string).unwrap_or_default();
            } else {
                // Strip only the fixed indent the serializer adds; deeper
                // indentation belongs to the script itself.
                let body = raw.strip_prefix("  ").unwrap_or(raw);
                script_lines.push(body.to_string());
            }
            continue;
        }

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(value) = line.strip_prefix("description ") {
            conf.desc = unquote(value).to_string();
        } else if let Some(value) = line.strip_prefix("env ") {
            let pair = shlex::split(value)
                .and_then(|mut parts| if parts.len() == 1 { parts.pop() } else { None })
                .ok_or_else(|| Error::NotValid(format!("env value {value:?}")))?;
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| Error::NotValid(format!("env value {value:?}")))?;
            conf.env.insert(k.to_string(), v.to_string());
        } else if let Some(value) = line.strip_prefix("limit ") {
            let (k, v) = value
                .split_once(' ')
                .ok_or_else(|| Error::NotValid(format!("limit value {value:?}")))?;
            conf.limit.insert(k.to_string(), v.trim().to_string());
        } else if line == "script" {
            in_script = true;
        } else if line.starts_with("start on ")
            || line.starts_with("stop on ")
            || line == "respawn"
            || line.starts_with("normal exit ")
            || line.starts_with("author ")
        {
            // Fixed boilerplate this agent always emits.
        } else {
            let stanza = line.split_whitespace().next().unwrap_or(line);
            return Err(Error::NotSupported(format!("upstart stanza {stanza:?}")));
        }
    }

    conf.extra_script = script_lines.join("\n");

    validate("<conf>", &conf)?;
    Ok(conf)
}

/// Split a `cmd >> file 2>&1` exec line into command and log destination.
fn split_exec_redirect(exec: &str) -> (&str, Option<&str>) {
    if let Some(rest) = exec.strip_suffix(" 2>&1") {
        if let Some((cmd, out)) = rest.rsplit_once(" >> ") {
            return (cmd, Some(out));
        }
    }
    (exec, None)
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
