//! Ring-of-pipes throughput benchmark.
//!
//! Every pipe in the ring is registered with the poller: readable interest on
//! the read end, writable interest on the write end but disabled. Priming
//! writes into the first pipe. From then on each readable pipe is drained and
//! enables writable interest on the next pipe's write end; each writable end
//! disables itself and writes. At any moment only one or two descriptors are
//! ready, so the cost of a wait is dominated by how the backend finds them
//! among all the registered ones.
use std::{
    fs::File,
    io::{self, Read, Write},
    os::fd::{AsRawFd, RawFd},
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use nix::{
    libc::{self, PIPE_BUF},
    sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal},
    unistd::alarm,
};

use crate::{
    poller::{AsPoller, Op, Ready, Token},
    report::Stats,
    utils::pipe_nonblocking,
};

pub struct Conn {
    rd: File,
    wr: File,
}

impl Conn {
    pub fn read_fd(&self) -> RawFd {
        self.rd.as_raw_fd()
    }

    pub fn write_fd(&self) -> RawFd {
        self.wr.as_raw_fd()
    }
}

pub struct Ring {
    conns: Vec<Conn>,
    scratch: Vec<u8>,
}

impl Ring {
    /// Open up to `pipes` pipes moving `rwmax` bytes at a time.
    ///
    /// Running out of descriptors part way is not fatal: the ring is simply
    /// shorter. Failing to open even one pipe is.
    pub fn open(pipes: usize, rwmax: usize) -> io::Result<Self> {
        let mut conns = Vec::with_capacity(pipes);
        for _ in 0..pipes {
            match pipe_nonblocking() {
                Ok((rd, wr)) => conns.push(Conn { rd, wr }),
                Err(e) if !conns.is_empty() => {
                    eprintln!("pipe: {}, continuing with {} pipes", e, conns.len());
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            conns,
            scratch: vec![0; rwmax.clamp(1, PIPE_BUF)],
        })
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn conns(&self) -> &[Conn] {
        &self.conns
    }

    /// Poller capacity hint covering every descriptor in the ring.
    pub fn capacity_hint(&self) -> usize {
        self.conns
            .iter()
            .map(|conn| conn.read_fd().max(conn.write_fd()) as usize + 1)
            .max()
            .unwrap_or(1)
    }

    pub fn register<P: AsPoller>(&self, poller: &mut P) -> io::Result<()> {
        for (i, conn) in self.conns.iter().enumerate() {
            poller.control(Op::Add, Ready::READABLE, conn.read_fd(), Token(i))?;
            poller.control(Op::Add, Ready::WRITABLE, conn.write_fd(), Token(i))?;
            poller.control(Op::Disable, Ready::WRITABLE, conn.write_fd(), Token(i))?;
        }
        Ok(())
    }

    pub fn deregister<P: AsPoller>(&self, poller: &mut P) -> io::Result<()> {
        for conn in &self.conns {
            poller.control(Op::Delete, Ready::READABLE, conn.read_fd(), Token::default())?;
            poller.control(Op::Delete, Ready::WRITABLE, conn.write_fd(), Token::default())?;
        }
        Ok(())
    }

    /// Put the first token into the ring.
    pub fn prime(&mut self) -> io::Result<()> {
        self.write_to(0)
    }

    fn write_to(&mut self, i: usize) -> io::Result<()> {
        let n = (&self.conns[i].wr).write(&self.scratch)?;
        if n != self.scratch.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write of {} bytes to pipe {}", n, i),
            ));
        }
        Ok(())
    }

    fn on_readable<P: AsPoller>(&mut self, poller: &mut P, i: usize) -> io::Result<bool> {
        match (&self.conns[i].rd).read(&mut self.scratch) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("pipe {} closed", i),
                ))
            }
            Ok(_) => {}
            // level-triggered readiness can be stale; we'll be told again
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }

        let next = (i + 1) % self.conns.len();
        poller.control(
            Op::Enable,
            Ready::WRITABLE,
            self.conns[next].write_fd(),
            Token(next),
        )?;
        Ok(true)
    }

    fn on_writable<P: AsPoller>(&mut self, poller: &mut P, i: usize) -> io::Result<()> {
        poller.control(Op::Disable, Ready::WRITABLE, self.conns[i].write_fd(), Token(i))?;
        self.write_to(i)
    }

    /// Pass the token around the ring until `stop` is raised.
    ///
    /// Each wait counts as one iteration. An error or hangup on any pipe
    /// ends the run early; the statistics gathered so far are still
    /// returned.
    pub fn run<P: AsPoller>(
        &mut self,
        poller: &mut P,
        stop: &AtomicBool,
        timeout_ms: i32,
    ) -> io::Result<Stats> {
        let start = Instant::now();
        let mut iterations = 0u64;
        let mut reads = 0u64;

        'ring: while !stop.load(Ordering::Relaxed) {
            match poller.wait(timeout_ms) {
                Ok(0) => {
                    eprintln!("wait: timeout");
                    continue;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            while let Some((ready, Token(i))) = poller.revents() {
                if ready.is_failed() {
                    eprintln!("error or hangup on pipe {}: {:?}", i, ready);
                    break 'ring;
                }
                if ready.is_readable() && self.on_readable(poller, i)? {
                    reads += 1;
                }
                if ready.is_writable() {
                    self.on_writable(poller, i)?;
                }
            }

            iterations += 1;
        }

        Ok(Stats::new(
            poller.backend(),
            self.len(),
            start.elapsed(),
            iterations,
            reads,
        ))
    }
}

static ALARM_FIRED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_alarm(signal: libc::c_int) {
    if signal == Signal::SIGALRM as libc::c_int {
        ALARM_FIRED.store(true, Ordering::Relaxed);
    }
}

/// Raise the returned flag after `secs` seconds via SIGALRM.
///
/// No SA_RESTART: the signal interrupts a blocked wait so the loop gets to
/// look at the flag.
pub fn arm_alarm(secs: u32) -> io::Result<&'static AtomicBool> {
    ALARM_FIRED.store(false, Ordering::Relaxed);
    let action = SigAction::new(
        SigHandler::Handler(on_alarm),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // the handler only stores to an atomic
    unsafe { sigaction(Signal::SIGALRM, &action) }?;
    alarm::set(secs);
    Ok(&ALARM_FIRED)
}
