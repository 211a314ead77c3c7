use std::fs::File;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use nix::sys::resource::{getrlimit, setrlimit, Resource};
use unipoll::utils::pipe_nonblocking;
use unipoll::{AnyPoller, AsPoller, Backend, Op, Ready, Token};

const WANTED: usize = 1000;
const ROUNDS: usize = 200;

/// Raise the descriptor limit far enough for `pipes` pipes and return how
/// many pipes actually fit.
fn raise_nofile(pipes: usize) -> usize {
    let wanted = (pipes * 2 + 64) as u64;
    if let Ok((soft, hard)) = getrlimit(Resource::RLIMIT_NOFILE) {
        if (soft as u64) < wanted {
            let soft = wanted.min(hard as u64);
            let _ = setrlimit(Resource::RLIMIT_NOFILE, soft as _, hard);
        }
        if let Ok((soft, _)) = getrlimit(Resource::RLIMIT_NOFILE) {
            return pipes.min((soft as usize).saturating_sub(64) / 2);
        }
    }
    pipes
}

fn open_pipes(n: usize) -> Vec<(File, File)> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        match pipe_nonblocking() {
            Ok(pair) => out.push(pair),
            Err(_) => break,
        }
    }
    out
}

/// Fastest `wait(0)` over `ROUNDS` tries with every read end in `pipes`
/// watched and only the last one readable.
fn fastest_wait(backend: Backend, pipes: &[&(File, File)]) -> Duration {
    let registered = pipes.len();
    let hint = pipes
        .iter()
        .map(|(rd, wr)| rd.as_raw_fd().max(wr.as_raw_fd()) as usize + 1)
        .max()
        .unwrap_or(1);
    let mut poller = AnyPoller::new(backend, hint).unwrap();
    for (i, (rd, _)) in pipes.iter().enumerate() {
        poller
            .control(Op::Add, Ready::READABLE, rd.as_raw_fd(), Token(i))
            .unwrap();
    }

    let last = registered - 1;
    let mut fastest = Duration::MAX;
    for _ in 0..ROUNDS {
        let start = Instant::now();
        let n = poller.wait(0).unwrap();
        fastest = fastest.min(start.elapsed());
        assert_eq!(n, 1, "{backend} with {registered} registered");
        assert_eq!(poller.revents(), Some((Ready::READABLE, Token(last))));
        assert_eq!(poller.revents(), None);
    }

    for (rd, _) in pipes {
        poller
            .control(Op::Delete, Ready::READABLE, rd.as_raw_fd(), Token(0))
            .unwrap();
    }
    fastest
}

#[test]
fn one_ready_among_many() {
    let pipes = open_pipes(raise_nofile(WANTED));
    assert!(pipes.len() >= 16, "only {} pipes could be opened", pipes.len());

    // both sets end with the one pipe that has data
    let all: Vec<&(File, File)> = pipes.iter().collect();
    let few = &all[all.len() - 10..];
    let many = all.len();
    (&all[many - 1].1).write_all(b"x").unwrap();

    for &backend in Backend::available() {
        let small_cost = fastest_wait(backend, few);
        let large_cost = fastest_wait(backend, &all);

        if backend.is_kernel_delegated() {
            // generous: the point is that it doesn't scale with `many`
            let bound = small_cost * 20 + Duration::from_micros(200);
            assert!(
                large_cost <= bound,
                "{backend}: {large_cost:?} with {many} registered vs {small_cost:?} with {}",
                few.len()
            );
        }
    }
}
