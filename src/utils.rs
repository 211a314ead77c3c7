use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

pub fn set_fd_nonblocking(fd: RawFd) -> nix::Result<()> {
    let bits = fcntl(fd, FcntlArg::F_GETFL)?;
    let prev_flags = OFlag::from_bits_truncate(bits);
    fcntl(fd, FcntlArg::F_SETFL(prev_flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Open a pipe with both ends in non-blocking mode, as `(read, write)`.
pub fn pipe_nonblocking() -> io::Result<(File, File)> {
    let (rd, wr) = nix::unistd::pipe()?;
    set_fd_nonblocking(rd.as_raw_fd())?;
    set_fd_nonblocking(wr.as_raw_fd())?;
    Ok((File::from(rd), File::from(wr)))
}
