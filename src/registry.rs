//! On-disk registry of agent-owned service configurations
//!
//! Each managed service owns `<data_dir>/init/<name>/` holding the conf
//! serialized for the active init system, plus an auxiliary start script
//! when the conf needs one. Directory presence with a parseable conf is the
//! sole source of truth for "this name is ours"; the in-memory name cache
//! is just an index rebuilt by `refresh`.

use std::path::{Path, PathBuf};

use crate::conf::Conf;
use crate::errors::{Error, Result};
use crate::initsystems::InitSystem;

/// Subdirectory of the agent data dir that holds managed conf dirs.
pub const INIT_DIR_NAME: &str = "init";

const SCRIPT_FILE: &str = "exec-start.sh";

/// One managed service's conf directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfDir {
    name: String,
    dir: PathBuf,
    conf_file: PathBuf,
}

impl ConfDir {
    fn new(name: &str, base_dir: &Path, init_name: &str) -> Self {
        let dir = base_dir.join(name);
        // systemd only loads unit files with a recognized extension.
        let ext = if init_name == "systemd" { "service" } else { "conf" };
        let conf_file = dir.join(format!("{name}.{ext}"));
        Self {
            name: name.to_string(),
            dir,
            conf_file,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn conf_path(&self) -> &Path {
        &self.conf_file
    }

    fn script_path(&self) -> PathBuf {
        self.dir.join(SCRIPT_FILE)
    }

    pub fn read_conf(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.conf_file).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(self.name.clone())
            } else {
                Error::Io(err)
            }
        })
    }

    /// A valid conf dir holds a conf the active init system can parse.
    fn validate(&self, init: &dyn InitSystem) -> Result<()> {
        let data = self.read_conf()?;
        init.deserialize(&data)?;
        Ok(())
    }

    /// Rewrite a conf whose command cannot be handed to the init system
    /// directly: an extra-script fragment or a multi-line command moves
    /// into an executable script and the command becomes that script.
    pub fn normalize(&self, conf: &Conf) -> (Conf, Option<String>) {
        if conf.extra_script.is_empty() && !conf.cmd.contains('\n') {
            return (conf.clone(), None);
        }

        let mut script = String::from("#!/usr/bin/env bash\n\n");
        if !conf.extra_script.is_empty() {
            script.push_str(&conf.extra_script);
            script.push('\n');
        }
        script.push_str(&conf.cmd);
        script.push('\n');

        let mut normalized = conf.clone();
        normalized.extra_script = String::new();
        normalized.cmd = self.script_path().display().to_string();
        (normalized, Some(script))
    }

    fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn write_conf(&self, data: &[u8]) -> Result<()> {
        std::fs::write(&self.conf_file, data)?;
        Ok(())
    }

    fn write_script(&self, content: &str) -> Result<()> {
        let path = self.script_path();
        std::fs::write(&path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        std::fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

/// The set of service names this agent owns, backed by conf directories.
#[derive(Debug)]
pub struct ServiceConfigs {
    base_dir: PathBuf,
    init_name: String,
    prefixes: Vec<String>,
    names: Vec<String>,
}

impl ServiceConfigs {
    /// `data_dir` is the parent of the registry's `init/` directory.
    /// Only names starting with one of `prefixes` are ever candidates.
    pub fn new(data_dir: &Path, init_name: &str, prefixes: &[&str]) -> Self {
        Self {
            base_dir: data_dir.join(INIT_DIR_NAME),
            init_name: init_name.to_string(),
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
            names: Vec::new(),
        }
    }

    fn new_dir(&self, name: &str) -> ConfDir {
        ConfDir::new(name, &self.base_dir, &self.init_name)
    }

    fn has_prefix(&self, name: &str) -> bool {
        self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Names currently tracked (as of the last mutation or refresh).
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Rebuild the tracked-name cache from disk.
    pub fn refresh(&mut self, init: &dyn InitSystem) -> Result<()> {
        self.names = self.scan(init)?;
        Ok(())
    }

    /// Scan the base directory for valid, prefix-matching conf dirs.
    fn scan(&self, init: &dyn InitSystem) -> Result<Vec<String>> {
        let mut names = Vec::new();

        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            // A fresh agent has no registry directory yet.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.has_prefix(&name) {
                continue;
            }
            match self.new_dir(&name).validate(init) {
                Ok(()) => names.push(name),
                Err(err) => {
                    log::debug!("skipping conf dir {name:?}: {err}");
                }
            }
        }

        names.sort();
        Ok(names)
    }

    pub fn lookup(&self, name: &str) -> Option<ConfDir> {
        if !self.names.iter().any(|n| n == name) {
            return None;
        }
        Some(self.new_dir(name))
    }

    /// Persist `conf` for `name` and start tracking it. The conf is
    /// normalized and then serialized by the active init system.
    pub fn add(&mut self, name: &str, conf: &Conf, init: &dyn InitSystem) -> Result<()> {
        if self.names.iter().any(|n| n == name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        let dir = self.new_dir(name);
        dir.create()?;

        let written = (|| {
            let (normalized, script) = dir.normalize(conf);
            if let Some(script) = script {
                dir.write_script(&script)?;
            }
            let data = init.serialize(name, &normalized)?;
            dir.write_conf(&data)
        })();
        if let Err(err) = written {
            // Leave no half-written conf dir behind.
            let _ = std::fs::remove_dir_all(dir.dir());
            return Err(err);
        }

        log::info!("now managing service {name}");
        self.names.push(name.to_string());
        self.names.sort();
        Ok(())
    }

    /// Delete the conf dir for `name` and stop tracking it.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let Some(dir) = self.lookup(name) else {
            return Err(Error::NotFound(name.to_string()));
        };

        dir.remove()?;
        self.names.retain(|n| n != name);
        log::info!("no longer managing service {name}");
        Ok(())
    }
}
