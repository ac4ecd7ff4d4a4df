//! Unit-file rendering and parsing
//!
//! Maps `Conf` fields onto `[Unit]`/`[Service]` directives and back. Only
//! the directives this agent emits are accepted when parsing; anything else
//! means the unit was written by someone else and surfaces as
//! `NotSupported`, which callers use to detect foreign services.

use crate::conf::{Conf, FieldSupport};
use crate::errors::{Error, Result};

pub const SUPPORT: FieldSupport = FieldSupport {
    env: true,
    limit: true,
    out: true,
    extra_script: false,
};

/// Conf limit keys and the unit directives they render as.
const LIMIT_MAP: &[(&str, &str)] = &[
    ("as", "LimitAS"),
    ("core", "LimitCORE"),
    ("cpu", "LimitCPU"),
    ("data", "LimitDATA"),
    ("fsize", "LimitFSIZE"),
    ("memlock", "LimitMEMLOCK"),
    ("msgqueue", "LimitMSGQUEUE"),
    ("nice", "LimitNICE"),
    ("nofile", "LimitNOFILE"),
    ("nproc", "LimitNPROC"),
    ("rss", "LimitRSS"),
    ("rtprio", "LimitRTPRIO"),
    ("sigpending", "LimitSIGPENDING"),
    ("stack", "LimitSTACK"),
];

fn limit_directive(key: &str) -> Option<&'static str> {
    LIMIT_MAP.iter().find(|(k, _)| *k == key).map(|(_, d)| *d)
}

fn limit_key(directive: &str) -> Option<&'static str> {
    LIMIT_MAP.iter().find(|(_, d)| *d == directive).map(|(k, _)| *k)
}

/// Check `conf` against what a unit file can express.
pub fn validate(name: &str, conf: &Conf) -> Result<()> {
    conf.validate(name, &SUPPORT)?;

    if !conf.out.is_empty() && conf.out != "syslog" {
        return Err(Error::NotValid(format!(
            "conf.Out value {:?} (options are: syslog)",
            conf.out
        )));
    }
    for key in conf.limit.keys() {
        if limit_directive(key).is_none() {
            return Err(Error::NotValid(format!("conf.Limit key {key:?}")));
        }
    }
    Ok(())
}

/// Render `conf` as unit-file text. Validates first.
pub fn serialize(name: &str, conf: &Conf) -> Result<Vec<u8>> {
    validate(name, conf)?;

    let mut out = String::new();
    out.push_str("[Unit]\n");
    out.push_str(&format!("Description={}\n", conf.desc));
    out.push('\n');
    out.push_str("[Service]\n");
    out.push_str(&format!("ExecStart={}\n", conf.cmd));
    if !conf.out.is_empty() {
        out.push_str(&format!("StandardOutput={}\n", conf.out));
        out.push_str(&format!("StandardError={}\n", conf.out));
    }
    for (k, v) in &conf.env {
        out.push_str(&format!("Environment=\"{k}={v}\"\n"));
    }
    for (k, v) in &conf.limit {
        // validate() already rejected keys outside the table
        if let Some(directive) = limit_directive(k) {
            out.push_str(&format!("{directive}={v}\n"));
        }
    }

    Ok(out.into_bytes())
}

/// Parse unit-file text back into a `Conf`, validating the result.
pub fn deserialize(data: &[u8]) -> Result<Conf> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::Parse("unit file is not valid UTF-8".to_string()))?;

    let mut conf = Conf::default();
    let mut section = String::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            section = line.trim_matches(|c| c == '[' || c == ']').to_string();
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::Parse(format!("directive line {line:?}")));
        };
        let (key, value) = (key.trim(), value.trim());

        match section.as_str() {
            "Unit" => match key {
                "Description" => conf.desc = value.to_string(),
                _ => return Err(Error::NotSupported(format!("unit directive {key:?}"))),
            },
            "Service" => parse_service_directive(&mut conf, key, value)?,
            _ => return Err(Error::NotSupported(format!("section {section:?}"))),
        }
    }

    validate("<unit>", &conf)?;
    Ok(conf)
}

fn parse_service_directive(conf: &mut Conf, key: &str, value: &str) -> Result<()> {
    match key {
        "ExecStart" => conf.cmd = value.to_string(),
        // Both are serialized to the same value, so either one wins.
        "StandardOutput" | "StandardError" => conf.out = value.to_string(),
        "Environment" => {
            let pair = shlex::split(value)
                .and_then(|mut parts| if parts.len() == 1 { parts.pop() } else { None })
                .ok_or_else(|| {
                    Error::NotValid(format!("service environment value {value:?}"))
                })?;
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| Error::NotValid(format!("service environment value {value:?}")))?;
            conf.env.insert(k.to_string(), v.to_string());
        }
        _ if key.starts_with("Limit") => {
            let limit = limit_key(key)
                .ok_or_else(|| Error::NotValid(format!("limit directive {key:?}")))?;
            conf.limit.insert(limit.to_string(), value.to_string());
        }
        _ => return Err(Error::NotSupported(format!("service directive {key:?}"))),
    }
    Ok(())
}

#[cfg(test)]
fn limit_keys() -> impl Iterator<Item = &'static str> {
    LIMIT_MAP.iter().map(|(k, _)| *k)
}
