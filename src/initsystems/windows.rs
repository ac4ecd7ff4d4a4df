//! Windows service-control adapter
//!
//! The persisted conf is a small JSON document carrying only the
//! description and start command; everything else a `Conf` can hold is
//! explicitly unsupported. Lifecycle operations shell out to PowerShell
//! and interpret the fixed "Running"/"Stopped" status tokens.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::conf::{Conf, FieldSupport};
use crate::errors::{Error, Result};
use crate::initsystems::{
    ensure_status, filter_names, InitSystem, ServiceInfo, Status, StatusQuery,
};
use crate::shell::{CmdRunner, SystemRunner};

pub const SUPPORT: FieldSupport = FieldSupport::MINIMAL;

/// Explicit adapter configuration.
#[derive(Debug, Clone, Default)]
pub struct WindowsOptions {
    /// PowerShell executable to invoke; empty means the default.
    pub shell: String,
}

pub struct WindowsServices {
    shell: String,
    runner: Box<dyn CmdRunner>,
}

/// On-disk JSON conf format.
#[derive(Debug, Serialize, Deserialize)]
struct JsonConf {
    description: String,
    startexec: String,
}

impl WindowsServices {
    pub fn new(options: WindowsOptions) -> Self {
        Self::with_runner(options, Box::new(SystemRunner))
    }

    /// Construct with an injected command runner (used by tests).
    pub fn with_runner(options: WindowsOptions, runner: Box<dyn CmdRunner>) -> Self {
        let shell = if options.shell.is_empty() {
            "powershell.exe".to_string()
        } else {
            options.shell
        };
        Self { shell, runner }
    }

    fn ps(&self, command: &str) -> Result<String> {
        let out = self
            .runner
            .run(&self.shell, &["-NoProfile", "-NonInteractive", "-Command", command])?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    /// The raw status token for the named service, or `NotFound` if the
    /// service-control manager does not know the name.
    fn status_token(&self, name: &str) -> Result<String> {
        self.ps(&format!("(Get-Service '{name}').Status"))
            .map_err(|_| Error::NotFound(name.to_string()))
    }
}

impl StatusQuery for WindowsServices {
    fn info(&self, name: &str) -> Result<ServiceInfo> {
        let token = self.status_token(name)?;
        let status = match token.as_str() {
            "Running" => Status::Running,
            "Stopped" => Status::Stopped,
            "StartPending" => Status::Starting,
            "StopPending" => Status::Stopping,
            _ => Status::Error,
        };
        Ok(ServiceInfo {
            name: name.to_string(),
            description: String::new(),
            status,
        })
    }
}

impl InitSystem for WindowsServices {
    fn name(&self) -> &str {
        "windows"
    }

    fn list(&self, include: &[String]) -> Result<Vec<String>> {
        let out = self.ps("(Get-Service).Name")?;
        let names = out.split_whitespace().map(str::to_string).collect();
        Ok(filter_names(names, include))
    }

    fn start(&self, name: &str) -> Result<()> {
        ensure_status(self, name, Status::Stopped)?;
        log::info!("starting service {name}");
        self.ps(&format!("Start-Service '{name}'"))?;
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        ensure_status(self, name, Status::Running)?;
        log::info!("stopping service {name}");
        self.ps(&format!("Stop-Service '{name}'"))?;
        Ok(())
    }

    fn enable(&self, name: &str, conf_path: &Path) -> Result<()> {
        ensure_status(self, name, Status::Disabled)?;

        let data = std::fs::read(conf_path)?;
        let conf = deserialize(&data)?;

        log::info!("enabling service {name} from {}", conf_path.display());
        self.ps(&format!(
            "New-Service -Name '{name}' -DisplayName '{}' '{}'",
            conf.desc, conf.cmd
        ))?;
        Ok(())
    }

    fn disable(&self, name: &str) -> Result<()> {
        ensure_status(self, name, Status::Enabled)?;

        // The SCM refuses to delete a running service cleanly.
        if self.info(name)?.status == Status::Running {
            log::info!("stopping service {name} before removal");
            self.ps(&format!("Stop-Service '{name}'"))?;
        }

        log::info!("disabling service {name}");
        self.ps(&format!(
            "(Get-WmiObject win32_service -Filter \"name='{name}'\").Delete()"
        ))?;
        Ok(())
    }

    fn is_enabled(&self, name: &str) -> Result<bool> {
        match self.status_token(name) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn conf(&self, name: &str) -> Result<Conf> {
        ensure_status(self, name, Status::Enabled)?;

        let desc = self.ps(&format!("(Get-Service '{name}').DisplayName"))?;
        let cmd = self.ps(&format!(
            "(Get-WmiObject win32_service -Filter \"name='{name}'\").PathName"
        ))?;
        Ok(Conf {
            desc,
            cmd,
            ..Default::default()
        })
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

/// Check `conf` against what the JSON format can express: only the
/// description and the start command.
pub fn validate(name: &str, conf: &Conf) -> Result<()> {
    conf.validate(name, &SUPPORT)
}

/// Render `conf` as the JSON conf document. Validates first.
pub fn serialize(name: &str, conf: &Conf) -> Result<Vec<u8>> {
    validate(name, conf)?;
    let json = JsonConf {
        description: conf.desc.clone(),
        startexec: conf.cmd.clone(),
    };
    let mut data = serde_json::to_vec_pretty(&json)
        .map_err(|err| Error::Parse(err.to_string()))?;
    data.push(b'\n');
    Ok(data)
}

/// Parse the JSON conf document back into a `Conf`. Unknown keys surface as
/// `NotSupported` naming the corresponding conf field.
pub fn deserialize(data: &[u8]) -> Result<Conf> {
    let value: serde_json::Value =
        serde_json::from_slice(data).map_err(|err| Error::Parse(err.to_string()))?;
    let serde_json::Value::Object(map) = value else {
        return Err(Error::Parse("conf document is not a JSON object".to_string()));
    };

    let mut conf = Conf::default();
    for (key, value) in map {
        match key.as_str() {
            "description" => conf.desc = json_string(&key, value)?,
            "startexec" => conf.cmd = json_string(&key, value)?,
            "env" => return Err(Error::NotSupported("Env".to_string())),
            "limit" => return Err(Error::NotSupported("Limit".to_string())),
            "out" => return Err(Error::NotSupported("Out".to_string())),
            "extrascript" => return Err(Error::NotSupported("ExtraScript".to_string())),
            _ => return Err(Error::NotSupported(format!("conf key {key:?}"))),
        }
    }

    validate("<conf>", &conf)?;
    Ok(conf)
}

fn json_string(key: &str, value: serde_json::Value) -> Result<String> {
    match value {
        serde_json::Value::String(s) => Ok(s),
        _ => Err(Error::NotValid(format!("conf key {key:?} (not a string)"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Responds to the PowerShell command strings the adapter issues.
    #[derive(Default)]
    struct FakeShell {
        calls: Mutex<Vec<String>>,
        status: Mutex<Option<&'static str>>,
        names: Mutex<&'static str>,
        display_name: Mutex<&'static str>,
        path_name: Mutex<&'static str>,
    }

    impl FakeShell {
        fn set_status(&self, status: Option<&'static str>) {
            *self.status.lock().unwrap() = status;
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CmdRunner for FakeShell {
        fn run(&self, _program: &str, args: &[&str]) -> Result<Vec<u8>> {
            let command = args.last().copied().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(command.clone());

            if command.contains("(Get-Service).Name") {
                return Ok(self.names.lock().unwrap().as_bytes().to_vec());
            }
            if command.contains(".Status") {
                return match *self.status.lock().unwrap() {
                    Some(token) => Ok(format!("{token}\n").into_bytes()),
                    None => Err(Error::CommandFailed {
                        cmd: command,
                        detail: "Cannot find any service".to_string(),
                    }),
                };
            }
            if command.contains(".DisplayName") {
                return Ok(self.display_name.lock().unwrap().as_bytes().to_vec());
            }
            if command.contains(".PathName") {
                return Ok(self.path_name.lock().unwrap().as_bytes().to_vec());
            }
            Ok(Vec::new())
        }
    }

    fn fixture() -> (WindowsServices, std::sync::Arc<FakeShell>) {
        let shell = std::sync::Arc::new(FakeShell::default());

        struct Shared(std::sync::Arc<FakeShell>);
        impl CmdRunner for Shared {
            fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>> {
                self.0.run(program, args)
            }
        }

        let init =
            WindowsServices::with_runner(WindowsOptions::default(), Box::new(Shared(shell.clone())));
        (init, shell)
    }

    fn base_conf() -> Conf {
        Conf {
            desc: "agent for db".to_string(),
            cmd: "run-db.exe machine-0".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip() {
        let conf = base_conf();
        let data = serialize("agent-db", &conf).unwrap();
        assert_eq!(deserialize(&data).unwrap(), conf);
    }

    #[test]
    fn test_serialize_layout() {
        let text = String::from_utf8(serialize("agent-db", &base_conf()).unwrap()).unwrap();
        assert!(text.contains("\"description\": \"agent for db\""));
        assert!(text.contains("\"startexec\": \"run-db.exe machine-0\""));
    }

    #[test]
    fn test_unsupported_fields() {
        let mut conf = base_conf();
        conf.env.insert("X".into(), "y".into());
        assert!(matches!(
            validate("agent-db", &conf),
            Err(Error::NotSupported(f)) if f == "Env"
        ));

        let mut conf = base_conf();
        conf.out = "syslog".into();
        assert!(matches!(
            serialize("agent-db", &conf),
            Err(Error::NotSupported(f)) if f == "Out"
        ));
    }

    #[test]
    fn test_deserialize_unknown_key() {
        let data = br#"{"description": "db", "startexec": "run-db.exe", "out": "x.log"}"#;
        let err = deserialize(data).unwrap_err();
        assert!(matches!(err, Error::NotSupported(f) if f == "Out"));
    }

    #[test]
    fn test_deserialize_missing_required() {
        let err = deserialize(br#"{"description": "db"}"#).unwrap_err();
        assert!(err.is_not_valid());
    }

    #[test]
    fn test_list() {
        let (init, shell) = fixture();
        *shell.names.lock().unwrap() = "agent-db something-else agent-api";

        let names = init.list(&[]).unwrap();
        assert_eq!(names, vec!["agent-db", "something-else", "agent-api"]);

        let names = init.list(&["agent-db".to_string()]).unwrap();
        assert_eq!(names, vec!["agent-db"]);
    }

    #[test]
    fn test_info_tokens() {
        let (init, shell) = fixture();

        shell.set_status(Some("Running"));
        assert_eq!(init.info("agent-db").unwrap().status, Status::Running);

        shell.set_status(Some("Stopped"));
        assert_eq!(init.info("agent-db").unwrap().status, Status::Stopped);

        shell.set_status(None);
        assert!(init.info("agent-db").unwrap_err().is_not_found());
    }

    #[test]
    fn test_start_stop_preconditions() {
        let (init, shell) = fixture();

        shell.set_status(Some("Running"));
        assert!(init.start("agent-db").unwrap_err().is_already_exists());
        init.stop("agent-db").unwrap();
        assert!(shell.calls().iter().any(|c| c.contains("Stop-Service")));

        shell.set_status(Some("Stopped"));
        assert!(init.stop("agent-db").unwrap_err().is_not_found());
        init.start("agent-db").unwrap();
        assert!(shell.calls().iter().any(|c| c.contains("Start-Service")));
    }

    #[test]
    fn test_enable_and_disable() {
        let (init, shell) = fixture();
        let dir = tempfile::TempDir::new().unwrap();
        let conf_path = dir.path().join("agent-db.conf");
        std::fs::write(&conf_path, serialize("agent-db", &base_conf()).unwrap()).unwrap();

        shell.set_status(None);
        init.enable("agent-db", &conf_path).unwrap();
        assert!(shell
            .calls()
            .iter()
            .any(|c| c.contains("New-Service -Name 'agent-db'")));

        shell.set_status(Some("Stopped"));
        let err = init.enable("agent-db", &conf_path).unwrap_err();
        assert!(err.is_already_exists());

        init.disable("agent-db").unwrap();
        assert!(shell.calls().iter().any(|c| c.contains(".Delete()")));
    }

    #[test]
    fn test_disable_running_service_stops_first() {
        let (init, shell) = fixture();
        shell.set_status(Some("Running"));

        init.disable("agent-db").unwrap();

        let calls = shell.calls();
        let stop = calls.iter().position(|c| c.contains("Stop-Service"));
        let delete = calls.iter().position(|c| c.contains(".Delete()"));
        assert!(stop.is_some());
        assert!(delete.is_some());
        assert!(stop < delete);
    }

    #[test]
    fn test_conf_reads_back_from_scm() {
        let (init, shell) = fixture();
        shell.set_status(Some("Stopped"));
        *shell.display_name.lock().unwrap() = "agent for db";
        *shell.path_name.lock().unwrap() = "run-db.exe machine-0";

        let conf = init.conf("agent-db").unwrap();
        assert_eq!(conf, base_conf());
    }

    #[test]
    fn test_is_enabled() {
        let (init, shell) = fixture();
        shell.set_status(None);
        assert!(!init.is_enabled("agent-db").unwrap());
        shell.set_status(Some("Stopped"));
        assert!(init.is_enabled("agent-db").unwrap());
    }
}
