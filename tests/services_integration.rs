//! Integration tests for the Services facade
//!
//! Drives the full stack — facade, on-disk registry, conf serialization —
//! against an in-memory init system that persists and parses real upstart
//! conf text.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use svcmgr::initsystems::{ensure_status, filter_names, upstart};
use svcmgr::{
    Conf, Error, InitSystem, Result, ServiceInfo, Services, Status, StatusQuery,
    DIRECTIVE_NOVERIFY, DIRECTIVE_RUNNING,
};

#[derive(Default)]
struct FakeHost {
    enabled: Mutex<BTreeMap<String, Conf>>,
    running: Mutex<BTreeSet<String>>,
}

impl FakeHost {
    fn enable_native(&self, name: &str, conf: Conf) {
        self.enabled.lock().unwrap().insert(name.to_string(), conf);
    }

    fn set_running(&self, name: &str) {
        self.running.lock().unwrap().insert(name.to_string());
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.enabled.lock().unwrap().contains_key(name)
    }

    fn is_running(&self, name: &str) -> bool {
        self.running.lock().unwrap().contains(name)
    }
}

struct FakeInit(Arc<FakeHost>);

impl StatusQuery for FakeInit {
    fn info(&self, name: &str) -> Result<ServiceInfo> {
        let enabled = self.0.enabled.lock().unwrap();
        let Some(conf) = enabled.get(name) else {
            return Err(Error::NotFound(name.to_string()));
        };
        let status = if self.0.is_running(name) {
            Status::Running
        } else {
            Status::Stopped
        };
        Ok(ServiceInfo {
            name: name.to_string(),
            description: conf.desc.clone(),
            status,
        })
    }
}

impl InitSystem for FakeInit {
    fn name(&self) -> &str {
        "upstart"
    }

    fn list(&self, include: &[String]) -> Result<Vec<String>> {
        let names = self.0.enabled.lock().unwrap().keys().cloned().collect();
        Ok(filter_names(names, include))
    }

    fn start(&self, name: &str) -> Result<()> {
        ensure_status(self, name, Status::Stopped)?;
        self.0.set_running(name);
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        ensure_status(self, name, Status::Running)?;
        self.0.running.lock().unwrap().remove(name);
        Ok(())
    }

    fn enable(&self, name: &str, conf_path: &Path) -> Result<()> {
        ensure_status(self, name, Status::Disabled)?;
        let conf = upstart::deserialize(&std::fs::read(conf_path)?)?;
        self.0.enable_native(name, conf);
        Ok(())
    }

    fn disable(&self, name: &str) -> Result<()> {
        ensure_status(self, name, Status::Enabled)?;
        self.0.running.lock().unwrap().remove(name);
        self.0.enabled.lock().unwrap().remove(name);
        Ok(())
    }

    fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.0.is_enabled(name))
    }

    fn conf(&self, name: &str) -> Result<Conf> {
        self.0
            .enabled
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn validate(&self, name: &str, conf: &Conf) -> Result<()> {
        upstart::validate(name, conf)
    }

    fn serialize(&self, name: &str, conf: &Conf) -> Result<Vec<u8>> {
        upstart::serialize(name, conf)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Conf> {
        upstart::deserialize(data)
    }
}

fn db_conf() -> Conf {
    Conf {
        desc: "database for the cluster".to_string(),
        cmd: "/usr/bin/run-db --data /var/lib/db".to_string(),
        env: [("PORT".to_string(), "5432".to_string())].into(),
        ..Default::default()
    }
}

fn fixture() -> (Services, Arc<FakeHost>, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let services = Services::new(dir.path(), Box::new(FakeInit(host.clone()))).unwrap();
    (services, host, dir)
}

#[test]
fn test_full_lifecycle() {
    let (mut services, host, _dir) = fixture();

    services.add("agent-db", &db_conf()).unwrap();
    assert!(services.is_managed("agent-db"));
    assert!(!services.is_enabled("agent-db").unwrap());

    services.enable("agent-db").unwrap();
    assert!(services.is_enabled("agent-db").unwrap());
    // The conf survived the trip through the on-disk registry.
    assert_eq!(host.enabled.lock().unwrap()["agent-db"], db_conf());

    services.start("agent-db").unwrap();
    assert!(services.is_running("agent-db").unwrap());

    services.stop("agent-db").unwrap();
    assert!(!services.is_running("agent-db").unwrap());

    services.remove("agent-db").unwrap();
    assert!(!services.is_managed("agent-db"));
    assert!(!host.is_enabled("agent-db"));
}

#[test]
fn test_idempotent_operations() {
    let (mut services, _host, _dir) = fixture();

    services.add("agent-db", &db_conf()).unwrap();
    services.enable("agent-db").unwrap();
    services.enable("agent-db").unwrap();

    services.start("agent-db").unwrap();
    services.start("agent-db").unwrap();

    services.stop("agent-db").unwrap();
    services.stop("agent-db").unwrap();

    services.disable("agent-db").unwrap();
    services.disable("agent-db").unwrap();

    // Removing a name that was never added is also a no-op.
    services.remove("agent-api").unwrap();
}

#[test]
fn test_conflicting_native_conf_blocks_ownership() {
    let (mut services, host, _dir) = fixture();

    services.add("agent-db", &db_conf()).unwrap();

    let mut foreign = db_conf();
    foreign.cmd = "/usr/bin/run-db --data /srv/other".to_string();
    host.enable_native("agent-db", foreign);
    host.set_running("agent-db");

    assert!(services.enable("agent-db").unwrap_err().is_not_managed());
    assert!(services.start("agent-db").unwrap_err().is_not_managed());

    // Remove forgets the record but leaves the foreign service running.
    services.remove("agent-db").unwrap();
    assert!(host.is_enabled("agent-db"));
    assert!(host.is_running("agent-db"));
}

#[test]
fn test_list_running() {
    let (mut services, host, _dir) = fixture();

    services.add("agent-db", &db_conf()).unwrap();
    services.add("agent-api", &db_conf()).unwrap();
    services.enable("agent-db").unwrap();
    services.enable("agent-api").unwrap();
    services.start("agent-db").unwrap();

    assert_eq!(
        services.list(&[]).unwrap(),
        ["agent-api".to_string(), "agent-db".to_string()]
    );
    assert_eq!(
        services.list(&[DIRECTIVE_RUNNING]).unwrap(),
        ["agent-db".to_string()]
    );

    // A service whose native conf drifted drops out of the verified list
    // but stays in the unverified one.
    let mut foreign = db_conf();
    foreign.cmd = "/usr/bin/other".to_string();
    host.enable_native("agent-db", foreign);
    assert!(services.list(&[DIRECTIVE_RUNNING]).unwrap().is_empty());
    assert_eq!(
        services
            .list(&[DIRECTIVE_RUNNING, DIRECTIVE_NOVERIFY])
            .unwrap(),
        ["agent-db".to_string()]
    );
}

#[test]
fn test_registry_survives_restart() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());

    {
        let mut services =
            Services::new(dir.path(), Box::new(FakeInit(host.clone()))).unwrap();
        services.add("agent-db", &db_conf()).unwrap();
        services.enable("agent-db").unwrap();
        services.start("agent-db").unwrap();
    }

    // A new facade over the same data dir picks up where the old one left off.
    let services = Services::new(dir.path(), Box::new(FakeInit(host.clone()))).unwrap();
    assert!(services.is_managed("agent-db"));
    assert!(services.is_running("agent-db").unwrap());
    assert!(services.check("agent-db", &db_conf()).unwrap());
}

#[test]
fn test_extra_script_round_trip() {
    let (mut services, host, dir) = fixture();

    let mut conf = db_conf();
    conf.extra_script = "mkdir -p /var/lib/db".to_string();
    services.add("agent-db", &conf).unwrap();
    services.enable("agent-db").unwrap();

    // The enabled conf execs the generated script.
    let script = dir.path().join("init/agent-db/exec-start.sh");
    assert!(script.exists());
    let enabled = host.enabled.lock().unwrap()["agent-db"].clone();
    assert_eq!(enabled.cmd, script.display().to_string());

    // check() compares against the normalized form.
    assert!(services.check("agent-db", &conf).unwrap());
}
