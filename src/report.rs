//! Benchmark results and where they are written.
//!
//! Sinks mirror the places a user would want numbers to land: the terminal
//! or an append-only log that accumulates rows across runs. A single `Sink`
//! enum wraps them so the binary can pick one at runtime from config.
use std::{
    fmt::Write as _,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    time::Duration,
};

use serde::Serialize;

use crate::conf::{ReportConf, ReportFormat, SinkKind};
use crate::poller::Backend;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Stats {
    pub backend: Backend,
    pub pipes: usize,
    pub elapsed_secs: f64,
    pub iterations: u64,
    pub reads: u64,
    pub waits_per_sec: f64,
    pub reads_per_sec: f64,
}

impl Stats {
    pub fn new(
        backend: Backend,
        pipes: usize,
        elapsed: Duration,
        iterations: u64,
        reads: u64,
    ) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let per_sec = |n: u64| {
            if elapsed_secs > 0.0 {
                n as f64 / elapsed_secs
            } else {
                0.0
            }
        };
        Self {
            backend,
            pipes,
            elapsed_secs,
            iterations,
            reads,
            waits_per_sec: per_sec(iterations),
            reads_per_sec: per_sec(reads),
        }
    }
}

/// Column header matching [`table_row`].
pub fn table_header(backend: Backend) -> String {
    format!(
        "{:>6} {:>6} {:>9} {:>8} {:>12}",
        "NFD",
        "SEC",
        backend.syscall(),
        "READ",
        "WAIT/SEC"
    )
}

pub fn table_row(stats: &Stats) -> String {
    format!(
        "{:>6} {:>6.3} {:>9} {:>8} {:>12.2}",
        stats.pipes, stats.elapsed_secs, stats.iterations, stats.reads, stats.waits_per_sec
    )
}

pub fn render_table(stats: &Stats, header: bool) -> String {
    let mut out = String::new();
    if header {
        out.push_str(&table_header(stats.backend));
        out.push('\n');
    }
    out.push_str(&table_row(stats));
    out.push('\n');

    let _ = writeln!(out, "{:>12} backend", stats.backend);
    let _ = writeln!(out, "{:>12} pipes", stats.pipes);
    let _ = writeln!(out, "{:>12.3} total run time", stats.elapsed_secs);
    let _ = writeln!(out, "{:>12} total iterations", stats.iterations);
    let _ = writeln!(out, "{:>12} total read operations", stats.reads);
    let _ = writeln!(out, "{:>12.2} reads/sec", stats.reads_per_sec);
    out
}

pub fn render(stats: &Stats, conf: &ReportConf) -> io::Result<String> {
    match conf.format {
        ReportFormat::Table => Ok(render_table(stats, conf.header)),
        ReportFormat::Json => {
            let mut json = serde_json::to_string_pretty(stats)?;
            json.push('\n');
            Ok(json)
        }
    }
}

pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn new<T>(path: T) -> io::Result<Self>
    where
        T: AsRef<Path>,
    {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                eprintln!("Failed to open report file: {}", e);
                e
            })?;

        Ok(Self { file })
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        Ok(())
    }
}

pub enum Sink {
    File(FileSink),
    StdOut,
    StdErr,
}

impl Sink {
    pub fn from_conf(kind: &SinkKind) -> io::Result<Self> {
        Ok(match kind {
            SinkKind::Log(path) => Self::File(FileSink::new(path)?),
            SinkKind::StdOut => Self::StdOut,
            SinkKind::StdErr => Self::StdErr,
        })
    }

    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Self::File(x) => x.write(bytes),
            Self::StdOut => {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                handle.write_all(bytes)?;
                handle.flush()
            }
            Self::StdErr => {
                let stderr = io::stderr();
                let mut handle = stderr.lock();
                handle.write_all(bytes)
            }
        }
    }
}

pub fn emit(sink: &mut Sink, stats: &Stats, conf: &ReportConf) -> io::Result<()> {
    let out = render(stats, conf)?;
    sink.write(out.as_bytes())
}
