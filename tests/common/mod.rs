/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! A scripted in-memory engine for driving the client and controller without real executables.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use uci_client::{EngineProcess, Launcher, ProcessKiller};

/// When a responder returns this line, the stub closes its output and exits.
pub const HANG_UP: &str = "<hang up>";

/// Produces the engine's output for each command it receives.
pub type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// Everything the stubs launched by one [`StubLauncher`] observed.
#[derive(Debug, Default)]
pub struct Record {
    pub launched: Vec<String>,
    pub sent: Vec<String>,
    pub kills: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Probe(Arc<Mutex<Record>>);

impl Probe {
    /// Paths of every engine launched, in order.
    pub fn launched(&self) -> Vec<String> {
        self.0.lock().launched.clone()
    }

    /// Every command sent to any engine, in order.
    pub fn sent(&self) -> Vec<String> {
        self.0.lock().sent.clone()
    }

    /// Commands sent that start with `prefix`.
    pub fn sent_starting_with(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .sent
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn kills(&self) -> usize {
        self.0.lock().kills
    }

    /// Blocks until some engine received a command starting with `prefix`.
    pub fn wait_for_command(&self, prefix: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.sent_starting_with(prefix).is_empty() {
            assert!(Instant::now() < deadline, "engine never received {prefix:?}");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

#[derive(Debug, Default)]
struct Output {
    lines: VecDeque<String>,
    closed: bool,
    exited: bool,
}

#[derive(Debug, Default)]
struct Engine {
    output: Mutex<Output>,
    changed: Condvar,
}

impl Engine {
    fn print(&self, lines: Vec<String>) {
        let mut output = self.output.lock();
        for line in lines {
            if output.closed {
                break;
            }
            if line == HANG_UP {
                output.closed = true;
                output.exited = true;
            } else {
                output.lines.push_back(line);
            }
        }
        self.changed.notify_all();
    }

    fn exit(&self) {
        let mut output = self.output.lock();
        output.closed = true;
        output.exited = true;
        self.changed.notify_all();
    }
}

pub struct StubProcess {
    engine: Arc<Engine>,
    responder: Responder,
    input_closed: bool,
    exits_on_quit: bool,
    probe: Probe,
}

impl EngineProcess for StubProcess {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        if self.input_closed || self.engine.output.lock().exited {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stub engine input is closed",
            ));
        }
        self.probe.0.lock().sent.push(line.to_string());

        if line == "quit" {
            if self.exits_on_quit {
                self.engine.exit();
            }
            return Ok(());
        }

        let lines = (self.responder)(line);
        self.engine.print(lines);
        Ok(())
    }

    fn recv_line(&mut self, timeout: Option<Duration>) -> io::Result<Option<String>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut output = self.engine.output.lock();
        loop {
            if let Some(line) = output.lines.pop_front() {
                return Ok(Some(line));
            }
            if output.closed {
                return Ok(None);
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "stub engine is silent"));
                }
                Some(deadline) => {
                    self.engine.changed.wait_until(&mut output, deadline);
                }
                None => self.engine.changed.wait(&mut output),
            }
        }
    }

    fn close(&mut self) {
        self.input_closed = true;
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut output = self.engine.output.lock();
        loop {
            if output.exited {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            self.engine.changed.wait_until(&mut output, deadline);
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        self.killer().kill()
    }

    fn killer(&self) -> ProcessKiller {
        let engine = Arc::clone(&self.engine);
        let probe = self.probe.clone();
        ProcessKiller::new(move || {
            probe.0.lock().kills += 1;
            engine.exit();
            Ok(())
        })
    }
}

/// Launches [`StubProcess`]es. Any path containing `missing` fails as if it did not exist.
pub struct StubLauncher {
    probe: Probe,
    engine: Box<dyn Fn(&str) -> Responder + Send + Sync>,
    exits_on_quit: bool,
}

impl StubLauncher {
    /// Every launched engine answers through a responder built by `engine` from its path.
    pub fn new(engine: impl Fn(&str) -> Responder + Send + Sync + 'static) -> Self {
        Self {
            probe: Probe::default(),
            engine: Box::new(engine),
            exits_on_quit: true,
        }
    }

    /// A launcher whose engines all behave like [`uci_engine`].
    pub fn standard() -> Self {
        Self::new(uci_engine)
    }

    /// Launched engines ignore `quit` and only stop when killed.
    pub fn stubborn(mut self) -> Self {
        self.exits_on_quit = false;
        self
    }

    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }
}

impl Launcher for StubLauncher {
    type Process = StubProcess;

    fn launch(&self, path: &str) -> io::Result<Self::Process> {
        if path.contains("missing") {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no such file or directory",
            ));
        }
        self.probe.0.lock().launched.push(path.to_string());

        Ok(StubProcess {
            engine: Arc::default(),
            responder: (self.engine)(path),
            input_closed: false,
            exits_on_quit: self.exits_on_quit,
            probe: self.probe.clone(),
        })
    }
}

/// The starting position with the given fullmove number.
pub fn fen(fullmove: u32) -> String {
    format!("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 {fullmove}")
}

/// Answers the handshake, or returns `None` for any other command.
fn handshake(name: &str, cmd: &str) -> Option<Vec<String>> {
    match cmd {
        "uci" => Some(vec![
            format!("id name {name}"),
            "id author The Testers".to_string(),
            "option name Hash type spin default 16 min 1 max 1024".to_string(),
            "uciok".to_string(),
        ]),
        "isready" => Some(vec!["readyok".to_string()]),
        _ => None,
    }
}

/// An engine that completes the handshake and answers every `go` through `search`,
/// which receives the FEN of the last `position` command.
pub fn engine_with(
    name: &str,
    mut search: impl FnMut(&str) -> Vec<String> + Send + 'static,
) -> Responder {
    let name = name.to_string();
    let mut position = String::new();
    Box::new(move |cmd| {
        if let Some(lines) = handshake(&name, cmd) {
            lines
        } else if let Some(fen) = cmd.strip_prefix("position fen ") {
            position = fen.to_string();
            Vec::new()
        } else if cmd.starts_with("go ") {
            search(&position)
        } else {
            Vec::new()
        }
    })
}

/// A well-behaved engine that scores every position at its fullmove number in pawns
/// and always plays `e2e4`.
pub fn uci_engine(name: &str) -> Responder {
    engine_with(name, |fen| {
        let fullmove: i32 = fen
            .split_whitespace()
            .last()
            .and_then(|n| n.parse().ok())
            .unwrap_or_default();
        vec![
            "info depth 1 seldepth 1 score cp 10 nodes 20 pv e2e4".to_string(),
            format!("info depth 2 score cp {} nodes 400 pv e2e4 e7e5", fullmove * 100),
            "bestmove e2e4 ponder e7e5".to_string(),
        ]
    })
}

/// An engine that always prints `lines` in response to `go`.
pub fn scripted_engine(lines: &'static [&'static str]) -> Responder {
    engine_with("Scripted", move |_| {
        lines.iter().map(|line| line.to_string()).collect()
    })
}

/// An engine that completes the handshake but never finishes a search.
pub fn stalling_engine() -> Responder {
    engine_with("Staller", |_| Vec::new())
}

/// An engine that takes `delay` to answer every `go`.
pub fn slow_engine(name: &str, delay: Duration) -> Responder {
    let mut engine = uci_engine(name);
    Box::new(move |cmd| {
        if cmd.starts_with("go ") {
            thread::sleep(delay);
        }
        engine(cmd)
    })
}

/// An engine that answers `uci` with `lines` and nothing else.
pub fn handshake_engine(lines: &'static [&'static str]) -> Responder {
    Box::new(move |cmd| match cmd {
        "uci" => lines.iter().map(|line| line.to_string()).collect(),
        _ => Vec::new(),
    })
}
