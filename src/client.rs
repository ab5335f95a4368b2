/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{
    io,
    time::{Duration, Instant},
};

use log::{debug, info, trace, warn};

use crate::{
    EngineError, EngineProcess, Launcher, ProcessKiller, UciCommand, UciIdInfo, UciResponse,
};

/// How long the engine may take to answer each half of the handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long [`UciClient::shutdown`] waits for the engine to exit after `quit` before killing it.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The outcome of a single search.
///
/// A result with neither field set is a valid success: the engine may legitimately
/// have no move (checkmate or stalemate) and may never report a score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AnalysisResult {
    /// The best move in UCI long algebraic notation, e.g. `e2e4` or `e7e8q`.
    pub best_move: Option<String>,

    /// The last reported score, e.g. `1.50` or `Mate in 3`.
    pub evaluation: Option<String>,
}

impl AnalysisResult {
    /// A result with no move and no evaluation.
    pub const fn empty() -> Self {
        Self {
            best_move: None,
            evaluation: None,
        }
    }
}

/// Lifecycle of a [`UciClient`].
///
/// ```text
/// NotStarted -> Spawning -> AwaitingUciOk -> AwaitingReadyOk -> Ready <-> Busy -> ShuttingDown -> Terminated
/// ```
/// Any step may end in [`ClientState::Failed`], which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    NotStarted,
    Spawning,
    AwaitingUciOk,
    AwaitingReadyOk,
    Ready,
    Busy,
    ShuttingDown,
    Terminated,
    Failed,
}

/// Owns one engine process and speaks UCI with it.
///
/// A client is handshaked exactly once. If [`UciClient::initialize`] fails, the
/// client stays unusable and a new one must be created.
#[derive(Debug)]
pub struct UciClient<P: EngineProcess> {
    state: ClientState,
    process: Option<P>,

    /// Every line the engine printed during the handshake.
    transcript: Vec<String>,

    /// From `id name`.
    name: Option<String>,

    /// From `id author`.
    author: Option<String>,
}

impl<P: EngineProcess> UciClient<P> {
    /// Creates a client that has not started any process yet.
    pub fn new() -> Self {
        Self {
            state: ClientState::NotStarted,
            process: None,
            transcript: Vec::new(),
            name: None,
            author: None,
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Whether the handshake completed and the process has not been shut down.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ClientState::Ready | ClientState::Busy)
    }

    /// The engine's name, if it sent `id name` during the handshake.
    pub fn engine_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The engine's author, if it sent `id author` during the handshake.
    pub fn engine_author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// A handle that kills this client's process from another thread, if one is running.
    pub fn process_killer(&self) -> Option<ProcessKiller> {
        self.process.as_ref().map(EngineProcess::killer)
    }

    /// Every line the engine printed during the handshake, in order.
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Spawns the engine at `path` and performs the `uci`/`isready` handshake.
    ///
    /// Returns `true` only if both `uciok` and `readyok` arrived within
    /// [`HANDSHAKE_TIMEOUT`] each. Use [`UciClient::try_initialize`] to learn why a handshake failed.
    pub fn initialize<L>(&mut self, launcher: &L, path: &str) -> bool
    where
        L: Launcher<Process = P>,
    {
        match self.try_initialize(launcher, path) {
            Ok(()) => true,
            Err(err) => {
                warn!("{err}");
                false
            }
        }
    }

    /// Like [`UciClient::initialize`], but reports why the engine could not be brought up.
    ///
    /// On failure the spawned process, if any, is torn down and the client is left [`ClientState::Failed`].
    pub fn try_initialize<L>(&mut self, launcher: &L, path: &str) -> Result<(), EngineError>
    where
        L: Launcher<Process = P>,
    {
        if self.state != ClientState::NotStarted {
            return Err(EngineError::InvalidState(self.state));
        }

        let result = self.handshake(launcher, path);
        if result.is_err() {
            self.state = ClientState::Failed;
            self.terminate();
        }
        result
    }

    fn handshake<L>(&mut self, launcher: &L, path: &str) -> Result<(), EngineError>
    where
        L: Launcher<Process = P>,
    {
        self.state = ClientState::Spawning;
        let process = launcher.launch(path).map_err(|source| EngineError::Spawn {
            path: path.to_string(),
            source,
        })?;
        self.process = Some(process);

        self.state = ClientState::AwaitingUciOk;
        self.send(&UciCommand::Uci).map_err(EngineError::Handshake)?;
        self.await_token("uciok")?;

        self.state = ClientState::AwaitingReadyOk;
        self.send(&UciCommand::IsReady).map_err(EngineError::Handshake)?;
        self.await_token("readyok")?;

        self.state = ClientState::Ready;
        info!(
            "engine {:?} at {path:?} is ready",
            self.name.as_deref().unwrap_or("<unnamed>")
        );
        Ok(())
    }

    /// Reads lines until one contains `token`, giving up after [`HANDSHAKE_TIMEOUT`].
    ///
    /// Everything before the token is kept in the transcript but otherwise ignored,
    /// which tolerates engines that print long banners on startup.
    fn await_token(&mut self, token: &'static str) -> Result<(), EngineError> {
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        let timeout = || EngineError::HandshakeTimeout {
            expected: token,
            budget: HANDSHAKE_TIMEOUT,
        };

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timeout());
            }

            let line = match self.recv(Some(remaining)) {
                Ok(Some(line)) => line,
                Ok(None) => return Err(EngineError::HandshakeProtocol { expected: token }),
                Err(err) if err.kind() == io::ErrorKind::TimedOut => return Err(timeout()),
                Err(err) => return Err(EngineError::Handshake(err)),
            };

            match UciResponse::new(&line) {
                Ok(UciResponse::Id(UciIdInfo::Name(name))) => self.name = Some(name),
                Ok(UciResponse::Id(UciIdInfo::Author(author))) => self.author = Some(author),
                _ => {}
            }

            let found = line.contains(token);
            self.transcript.push(line);
            if found {
                return Ok(());
            }
        }
    }

    /// Sends `setoption name <name> value <value>`.
    ///
    /// A write failure is reported as [`EngineError::Configuration`] but leaves the
    /// client's state alone, since the engine is assumed to still be alive.
    pub fn set_option(
        &mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<(), EngineError> {
        self.send_option(&UciCommand::set_option(name.as_ref(), value.as_ref()))
    }

    /// Sends an already-built `setoption` command. See [`UciClient::set_option`].
    pub fn send_option(&mut self, cmd: &UciCommand) -> Result<(), EngineError> {
        if self.state != ClientState::Ready {
            return Err(EngineError::InvalidState(self.state));
        }
        self.send(cmd).map_err(EngineError::Configuration)
    }

    /// Searches `fen` for `movetime` and returns the engine's best move and last evaluation.
    ///
    /// Every `info` line with a score overwrites the previous evaluation; `info` lines
    /// with a malformed score are skipped, while other fields missing their value are ignored. Reading ends at the first `bestmove` line,
    /// so this blocks for roughly `movetime`.
    ///
    /// If the engine's streams fail before `bestmove`, the client becomes
    /// [`ClientState::Failed`] and [`EngineError::Analysis`] is returned.
    pub fn analyze(
        &mut self,
        fen: &str,
        movetime: Duration,
    ) -> Result<AnalysisResult, EngineError> {
        if self.state != ClientState::Ready {
            return Err(EngineError::InvalidState(self.state));
        }

        self.state = ClientState::Busy;
        match self.search(fen, movetime) {
            Ok(result) => {
                self.state = ClientState::Ready;
                Ok(result)
            }
            Err(err) => {
                self.state = ClientState::Failed;
                Err(EngineError::Analysis(err))
            }
        }
    }

    fn search(&mut self, fen: &str, movetime: Duration) -> io::Result<AnalysisResult> {
        self.send(&UciCommand::Position {
            fen: fen.to_string(),
        })?;
        self.send(&UciCommand::Go { movetime })?;

        let mut evaluation = None;
        loop {
            let Some(line) = self.recv(None)? else {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "engine output closed before bestmove",
                ));
            };

            if line.starts_with("bestmove") {
                let best_move = match UciResponse::new(&line) {
                    Ok(UciResponse::BestMove { bestmove, .. }) => bestmove,
                    _ => None,
                };
                return Ok(AnalysisResult {
                    best_move,
                    evaluation,
                });
            }

            if line.starts_with("info") && line.contains("score") {
                match UciResponse::new(&line) {
                    Ok(UciResponse::Info(info)) => {
                        if let Some(score) = info.score {
                            evaluation = Some(score.evaluation());
                        }
                    }
                    Ok(_) => {}
                    Err(err) => debug!("skipping engine line: {err}"),
                }
            }
        }
    }

    /// Sends `quit`, closes the streams and waits [`SHUTDOWN_GRACE`] for the engine
    /// to exit before killing it.
    ///
    /// Safe to call in any state and any number of times; never fails.
    pub fn shutdown(&mut self) {
        if self.process.is_none() {
            return;
        }
        if self.state != ClientState::Failed {
            self.state = ClientState::ShuttingDown;
        }
        self.terminate();
        if self.state != ClientState::Failed {
            self.state = ClientState::Terminated;
        }
    }

    /// Stops the process without touching the client's state.
    fn terminate(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };

        if let Err(err) = process.send_line(&UciCommand::Quit.to_string()) {
            debug!("engine did not accept quit: {err}");
        }
        process.close();

        match process.wait_timeout(SHUTDOWN_GRACE) {
            Ok(true) => debug!("engine exited"),
            Ok(false) => {
                warn!("{}", EngineError::ShutdownForced { grace: SHUTDOWN_GRACE });
                kill(&mut process);
            }
            Err(err) => {
                warn!("failed to wait for engine to exit: {err}");
                kill(&mut process);
            }
        }
    }

    fn send(&mut self, cmd: &UciCommand) -> io::Result<()> {
        let process = self.process.as_mut().ok_or_else(not_connected)?;
        debug!("> {cmd}");
        process.send_line(&cmd.to_string())
    }

    fn recv(&mut self, timeout: Option<Duration>) -> io::Result<Option<String>> {
        let process = self.process.as_mut().ok_or_else(not_connected)?;
        let line = process.recv_line(timeout)?;
        if let Some(line) = &line {
            trace!("< {line}");
        }
        Ok(line)
    }
}

impl<P: EngineProcess> Default for UciClient<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: EngineProcess> Drop for UciClient<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn kill(process: &mut impl EngineProcess) {
    if let Err(err) = process.kill() {
        warn!("failed to kill engine: {err}");
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "engine process is not running")
}
