//! The serializable benchmark configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! runnable setup. The format is picked from the file extension.
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use nix::libc::PIPE_BUF;
use serde::{Deserialize, Serialize};

use crate::poller::{Backend, DEFAULT_READY_CAPACITY};

#[derive(Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Table,
    Json,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Log(PathBuf),
    #[default]
    StdOut,
    StdErr,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportConf {
    #[serde(default)]
    pub format: ReportFormat,

    #[serde(default)]
    pub sink: SinkKind,

    #[serde(default)]
    pub header: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BenchConf {
    #[serde(default = "default_pipes")]
    pub pipes: usize,

    #[serde(default = "default_rwmax")]
    pub rwmax: usize,

    #[serde(default = "default_duration")]
    pub duration: u32,

    #[serde(default = "Backend::native")]
    pub backend: Backend,

    #[serde(default = "default_ready_capacity")]
    pub ready_capacity: usize,

    #[serde(default)]
    pub report: ReportConf,
}

impl Default for BenchConf {
    fn default() -> Self {
        Self {
            pipes: default_pipes(),
            rwmax: default_rwmax(),
            duration: default_duration(),
            backend: Backend::native(),
            ready_capacity: default_ready_capacity(),
            report: ReportConf::default(),
        }
    }
}

impl BenchConf {
    pub fn load<T>(path: T) -> io::Result<Self>
    where
        T: AsRef<Path>,
    {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => Self::parse(&contents, ext),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{}: no extension", path.display()),
            )),
        }
    }

    /// Parse `contents` in the format named by the extension `ext`.
    pub fn parse(contents: &str, ext: &str) -> io::Result<Self> {
        let conf: Self = match ext {
            "toml" => toml::from_str(contents).map_err(invalid_data)?,
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(invalid_data)?,
            "json" => serde_json::from_str(contents).map_err(invalid_data)?,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported config format: .{ext}"),
                ))
            }
        };
        Ok(conf)
    }

    pub fn validate(&self) -> io::Result<()> {
        let problem = if self.pipes < 1 {
            Some("pipes must be at least 1".to_string())
        } else if self.duration < 1 {
            Some("duration must be at least 1 second".to_string())
        } else if self.ready_capacity < 1 {
            Some("ready_capacity must be at least 1".to_string())
        } else if !self.backend.is_available() {
            Some(format!("backend {} is not available here", self.backend))
        } else {
            None
        };

        match problem {
            Some(msg) => Err(io::Error::new(io::ErrorKind::InvalidInput, msg)),
            None => Ok(()),
        }
    }

    /// Bytes moved per read/write, kept within one atomic pipe write.
    pub fn rwmax(&self) -> usize {
        self.rwmax.clamp(1, PIPE_BUF)
    }
}

fn invalid_data<E>(e: E) -> io::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn default_pipes() -> usize {
    8
}

fn default_rwmax() -> usize {
    1
}

fn default_duration() -> u32 {
    10
}

fn default_ready_capacity() -> usize {
    DEFAULT_READY_CAPACITY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let conf = BenchConf::parse("", "toml").unwrap();
        assert_eq!(conf, BenchConf::default());
        assert_eq!(conf.pipes, 8);
        assert_eq!(conf.duration, 10);
        assert_eq!(conf.backend, Backend::native());
        assert_eq!(conf.report.sink, SinkKind::StdOut);
    }

    #[test]
    fn toml_overrides() {
        let conf = BenchConf::parse(
            r#"
            pipes = 64
            rwmax = 16
            backend = "poll"

            [report]
            format = "json"
            header = true
            sink = { log = "bench.log" }
            "#,
            "toml",
        )
        .unwrap();
        assert_eq!(conf.pipes, 64);
        assert_eq!(conf.rwmax(), 16);
        assert_eq!(conf.backend, Backend::Poll);
        assert_eq!(conf.report.format, ReportFormat::Json);
        assert!(conf.report.header);
        assert_eq!(conf.report.sink, SinkKind::Log(PathBuf::from("bench.log")));
        assert_eq!(conf.ready_capacity, DEFAULT_READY_CAPACITY);
    }

    #[test]
    fn yaml_and_json() {
        let yaml = BenchConf::parse("pipes: 3\nreport:\n  sink: stderr\n", "yml").unwrap();
        assert_eq!(yaml.pipes, 3);
        assert_eq!(yaml.report.sink, SinkKind::StdErr);

        let json = BenchConf::parse(r#"{"duration": 2, "ready_capacity": 32}"#, "json").unwrap();
        assert_eq!(json.duration, 2);
        assert_eq!(json.ready_capacity, 32);
    }

    #[test]
    fn bad_input() {
        let err = BenchConf::parse("pipes = \"many\"", "toml").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = BenchConf::parse("", "ini").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn rwmax_is_clamped() {
        let mut conf = BenchConf::default();
        conf.rwmax = 0;
        assert_eq!(conf.rwmax(), 1);
        conf.rwmax = usize::MAX;
        assert_eq!(conf.rwmax(), PIPE_BUF);
    }

    #[test]
    fn validation() {
        assert!(BenchConf::default().validate().is_ok());

        let mut conf = BenchConf::default();
        conf.pipes = 0;
        assert!(conf.validate().is_err());

        let mut conf = BenchConf::default();
        conf.ready_capacity = 0;
        assert!(conf.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!("unipoll-conf-{}.toml", std::process::id()));
        fs::write(&path, "pipes = 5\n").unwrap();
        let conf = BenchConf::load(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(conf.pipes, 5);
    }
}
