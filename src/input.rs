//! User commands and the terminal source they arrive from

use std::collections::VecDeque;
use std::io::{self, Read};
use std::os::fd::AsFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Up,
    Down,
}

impl Step {
    pub fn signed(&self, magnitude: i32) -> i32 {
        match self {
            Step::Up => magnitude,
            Step::Down => -magnitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    ToggleProcessing,
    CycleResolution,
    CycleCodec,
    ToggleAutoExposure,
    AdjustExposure(Step),
    AdjustGain(Step),
    ToggleAutoFocus,
    AdjustFocus(Step),
}

pub const HELP: &str = "keys (then Enter): q quit | space processing | r resolution | c codec | \
x auto-exposure | [ ] exposure | - = gain | f auto-focus | , . focus";

pub fn command_for_key(key: char) -> Option<Command> {
    let command = match key {
        'q' | 'Q' | '\u{1b}' => Command::Quit,
        ' ' => Command::ToggleProcessing,
        'r' | 'R' => Command::CycleResolution,
        'c' | 'C' => Command::CycleCodec,
        'x' | 'X' => Command::ToggleAutoExposure,
        '[' => Command::AdjustExposure(Step::Down),
        ']' => Command::AdjustExposure(Step::Up),
        '-' => Command::AdjustGain(Step::Down),
        '=' | '+' => Command::AdjustGain(Step::Up),
        'f' | 'F' => Command::ToggleAutoFocus,
        ',' => Command::AdjustFocus(Step::Down),
        '.' => Command::AdjustFocus(Step::Up),
        _ => return None,
    };
    Some(command)
}

/// Where the pipeline loop gets user commands from
pub trait CommandSource {
    /// Wait at most `timeout` for the next command.
    fn poll(&mut self, timeout: Duration) -> Option<Command>;
}

/// Reads key characters from standard input without blocking the loop.
pub struct StdinCommands {
    pending: VecDeque<Command>,
    buf: Vec<u8>,
    closed: bool,
}

impl StdinCommands {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            // At least the stdin buffer size so reads bypass its internal buffer
            buf: vec![0; 8192],
            closed: false,
        }
    }

    fn read_available(&mut self, timeout: Duration) -> io::Result<()> {
        let stdin = io::stdin();
        let ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);

        let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(ms)) {
            Ok(0) | Err(Errno::EINTR) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }

        let ready = fds[0]
            .revents()
            .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP));
        if !ready {
            return Ok(());
        }

        let n = stdin.lock().read(&mut self.buf)?;
        if n == 0 {
            info!("Standard input closed; keyboard commands disabled");
            self.closed = true;
            return Ok(());
        }

        self.pending.extend(
            self.buf[..n]
                .iter()
                .filter_map(|&b| command_for_key(b as char)),
        );
        Ok(())
    }
}

impl Default for StdinCommands {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSource for StdinCommands {
    fn poll(&mut self, timeout: Duration) -> Option<Command> {
        if let Some(command) = self.pending.pop_front() {
            return Some(command);
        }

        if self.closed {
            std::thread::sleep(timeout);
            return None;
        }

        if let Err(e) = self.read_available(timeout) {
            warn!("Failed to read standard input: {}; keyboard commands disabled", e);
            self.closed = true;
        }
        self.pending.pop_front()
    }
}
