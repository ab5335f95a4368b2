/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{
    fmt,
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    process::{Child, ChildStdin, Command, Stdio},
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::debug;
use parking_lot::Mutex;

/// How often [`ChildProcess::wait_timeout`] checks whether the engine has exited.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The raw line-oriented streams of one running engine.
///
/// [`UciClient`](crate::UciClient) only ever talks to an engine through this trait,
/// so tests can substitute a scripted engine for a real executable.
pub trait EngineProcess: Send {
    /// Writes `line` followed by a newline and flushes it.
    fn send_line(&mut self, line: &str) -> io::Result<()>;

    /// Reads the next line printed by the engine, without its line terminator.
    ///
    /// Returns `Ok(None)` once the engine's output is closed. With `Some(timeout)`,
    /// fails with [`io::ErrorKind::TimedOut`] if no line arrives in time; with `None`
    /// it blocks until a line arrives or the stream closes.
    fn recv_line(&mut self, timeout: Option<Duration>) -> io::Result<Option<String>>;

    /// Closes the engine's input stream.
    fn close(&mut self);

    /// Waits up to `timeout` for the engine to exit, returning whether it did.
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Forcibly terminates the engine.
    fn kill(&mut self) -> io::Result<()>;

    /// A handle that can kill this engine from another thread while it is in use.
    fn killer(&self) -> ProcessKiller;
}

/// Starts engine processes from an executable path.
pub trait Launcher: Send + Sync {
    /// The kind of process this launcher produces.
    type Process: EngineProcess;

    /// Starts the engine at `path`.
    fn launch(&self, path: &str) -> io::Result<Self::Process>;
}

/// A cloneable, thread-safe handle that force-kills one engine process.
///
/// Killing the process closes its output, which unblocks any thread waiting in
/// [`EngineProcess::recv_line`].
#[derive(Clone)]
pub struct ProcessKiller(Arc<dyn Fn() -> io::Result<()> + Send + Sync>);

impl ProcessKiller {
    /// Wraps the function that performs the kill.
    pub fn new(kill: impl Fn() -> io::Result<()> + Send + Sync + 'static) -> Self {
        Self(Arc::new(kill))
    }

    /// Kills the process.
    pub fn kill(&self) -> io::Result<()> {
        (self.0)()
    }
}

impl fmt::Debug for ProcessKiller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProcessKiller(..)")
    }
}

/// An engine running as an operating-system child process.
///
/// A background thread pumps the engine's `stdout` into a channel, so reads can be
/// bounded by a timeout without polling.
#[derive(Debug)]
pub struct ChildProcess {
    /// Shared with every [`ProcessKiller`] handed out for this process.
    child: Arc<Mutex<Child>>,

    /// `None` once the input stream has been closed.
    stdin: Option<BufWriter<ChildStdin>>,

    /// Lines read by the pump thread. Disconnects when the engine's output closes.
    lines: Receiver<io::Result<String>>,
}

impl ChildProcess {
    /// Spawns the executable at `path` with piped `stdin`/`stdout`.
    pub fn spawn(path: &str) -> io::Result<Self> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let pipes = child.stdin.take().zip(child.stdout.take());
        let Some((stdin, stdout)) = pipes else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "engine started without piped stdin/stdout",
            ));
        };

        let (sender, lines) = mpsc::channel();
        let pump = thread::Builder::new()
            .name(format!("uci-stdout-{}", child.id()))
            .spawn(move || pump_lines(stdout, sender));
        if let Err(err) = pump {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }

        debug!("spawned engine {path:?} as pid {}", child.id());

        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            stdin: Some(BufWriter::new(stdin)),
            lines,
        })
    }
}

/// Forwards every line of `stdout` to `sender` until the stream closes or the receiver is gone.
///
/// Lines are decoded lossily, so an engine printing Latin-1 in an `id` or `info string`
/// line does not end the session.
fn pump_lines(stdout: impl Read, sender: Sender<io::Result<String>>) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let line = match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => Ok(decode_line(&buf)),
            Err(err) => Err(err),
        };

        let failed = line.is_err();
        if sender.send(line).is_err() || failed {
            break;
        }
    }
}

/// Strips the line terminator (`\n` or `\r\n`) and decodes the rest as UTF-8.
fn decode_line(buf: &[u8]) -> String {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

impl EngineProcess for ChildProcess {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine input is closed"))?;

        stdin.write_all(line.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()
    }

    fn recv_line(&mut self, timeout: Option<Duration>) -> io::Result<Option<String>> {
        let line = match timeout {
            Some(timeout) => match self.lines.recv_timeout(timeout) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "timed out waiting for engine output",
                    ))
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            },
            None => match self.lines.recv() {
                Ok(line) => line,
                Err(_) => return Ok(None),
            },
        }?;

        Ok(Some(line))
    }

    fn close(&mut self) {
        // Dropping the writer flushes it and closes the pipe
        self.stdin = None;
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.child.lock().try_wait()?.is_some() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        kill_child(&self.child)
    }

    fn killer(&self) -> ProcessKiller {
        let child = Arc::clone(&self.child);
        ProcessKiller::new(move || kill_child(&child))
    }
}

/// Kills and reaps `child`, treating an already-exited process as success.
fn kill_child(child: &Mutex<Child>) -> io::Result<()> {
    let mut child = child.lock();
    if child.try_wait()?.is_some() {
        return Ok(());
    }
    child.kill()?;
    child.wait().map(|_| ())
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // Never leave an orphaned engine behind
        if let Err(err) = kill_child(&self.child) {
            debug!("failed to reap engine process: {err}");
        }
    }
}

/// Launches engines as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    type Process = ChildProcess;

    fn launch(&self, path: &str) -> io::Result<Self::Process> {
        ChildProcess::spawn(path)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_echo_process() {
        // `cat` echoes every line back, which is enough to exercise the pipes
        let mut process = SystemLauncher.launch("cat").unwrap();
        process.send_line("uciok").unwrap();
        let line = process.recv_line(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(line.as_deref(), Some("uciok"));

        // Closing stdin makes `cat` exit on its own
        process.close();
        assert!(process.wait_timeout(Duration::from_secs(5)).unwrap());
        assert_eq!(process.recv_line(Some(Duration::from_secs(5))).unwrap(), None);
        assert!(process.send_line("isready").is_err());
    }

    #[test]
    fn test_recv_timeout() {
        let mut process = SystemLauncher.launch("cat").unwrap();
        let err = process
            .recv_line(Some(Duration::from_millis(20)))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        process.kill().unwrap();
    }

    #[test]
    fn test_killer_unblocks_reader() {
        let mut process = SystemLauncher.launch("cat").unwrap();
        let killer = process.killer();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            killer.kill()
        });

        // Blocks until the kill closes the engine's output
        assert_eq!(process.recv_line(None).unwrap(), None);
        handle.join().unwrap().unwrap();
        assert!(process.wait_timeout(Duration::ZERO).unwrap());
    }

    #[test]
    fn test_pump_decodes_lossily() {
        let (sender, lines) = mpsc::channel();
        let output: &[u8] = b"Engine 1.0\r\nid author St\xe9phane\ninfo string caf\xe9\nuciok";
        pump_lines(output, sender);

        let lines = lines
            .into_iter()
            .collect::<io::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(
            lines,
            [
                "Engine 1.0",
                "id author St\u{FFFD}phane",
                "info string caf\u{FFFD}",
                "uciok"
            ]
        );
    }

    #[test]
    fn test_missing_executable() {
        let err = SystemLauncher
            .launch("/definitely/not/an/engine")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
