//! Uses clap to define the CLI interface declaratively.
use std::path::PathBuf;

use clap::Parser;
use unipoll::{conf::BenchConf, conf::ReportFormat, Backend};

#[derive(Parser, Debug)]
#[command(version, about = "Pass a token around a ring of pipes and count waits", long_about = None)]
pub struct Cli {
    /// number of pipes in the ring
    #[arg(value_name = "PIPES")]
    pub pipes: Option<usize>,

    /// toml, yaml or json file with benchmark settings
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    pub backend: Option<Backend>,

    /// seconds to run for
    #[arg(short, long, value_name = "SECS")]
    pub duration: Option<u32>,

    /// bytes moved per read and write
    #[arg(long, value_name = "BYTES")]
    pub rwmax: Option<usize>,

    /// ready entries fetched per wait by the kernel-delegated backends
    #[arg(long, value_name = "N")]
    pub ready_capacity: Option<usize>,

    #[arg(short, long, value_enum)]
    pub format: Option<ReportFormat>,

    /// print the column header above the result row
    #[arg(long)]
    pub header: bool,
}

impl Cli {
    /// Flags given on the command line win over the config file.
    pub fn apply(&self, conf: &mut BenchConf) {
        if let Some(pipes) = self.pipes {
            conf.pipes = pipes;
        }
        if let Some(backend) = self.backend {
            conf.backend = backend;
        }
        if let Some(duration) = self.duration {
            conf.duration = duration;
        }
        if let Some(rwmax) = self.rwmax {
            conf.rwmax = rwmax;
        }
        if let Some(ready_capacity) = self.ready_capacity {
            conf.ready_capacity = ready_capacity;
        }
        if let Some(format) = self.format {
            conf.report.format = format;
        }
        if self.header {
            conf.report.header = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from(["unipoll", "100", "-b", "poll", "--rwmax", "4", "--header"]);
        let mut conf = BenchConf::default();
        conf.duration = 3;
        cli.apply(&mut conf);

        assert_eq!(conf.pipes, 100);
        assert_eq!(conf.backend, Backend::Poll);
        assert_eq!(conf.rwmax, 4);
        assert_eq!(conf.duration, 3);
        assert!(conf.report.header);
    }

    #[test]
    fn no_flags_keeps_config() {
        let cli = Cli::parse_from(["unipoll"]);
        let mut conf = BenchConf::default();
        conf.pipes = 42;
        cli.apply(&mut conf);
        assert_eq!(conf, BenchConf {
            pipes: 42,
            ..BenchConf::default()
        });
    }
}
