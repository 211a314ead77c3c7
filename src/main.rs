mod cli;
use crate::cli::Cli;
use clap::Parser;
use std::io;
use unipoll::bench::{self, Ring};
use unipoll::conf::BenchConf;
use unipoll::report::{self, Sink};
use unipoll::AnyPoller;

fn main() -> io::Result<()> {
    let cli = Cli::parse();

    let mut conf = match &cli.config {
        Some(path) => BenchConf::load(path)?,
        None => BenchConf::default(),
    };
    cli.apply(&mut conf);
    conf.validate()?;

    // open the sink first so a bad log path fails before the run
    let mut sink = Sink::from_conf(&conf.report.sink)?;

    let mut ring = Ring::open(conf.pipes, conf.rwmax())?;
    let mut poller =
        AnyPoller::with_ready_capacity(conf.backend, ring.capacity_hint(), conf.ready_capacity)?;

    ring.register(&mut poller)?;
    ring.prime()?;

    let stop = bench::arm_alarm(conf.duration)?;
    let stats = ring.run(&mut poller, stop, -1)?;
    ring.deregister(&mut poller)?;

    if stats.pipes != conf.pipes {
        eprintln!("ran with {} of {} pipes", stats.pipes, conf.pipes);
    }

    report::emit(&mut sink, &stats, &conf.report)
}
