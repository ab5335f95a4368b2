/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{io, time::Duration};

use thiserror::Error;

use crate::ClientState;

/// Errors that can occur when parsing a line sent by a UCI engine.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UciParseError {
    /// The provided line could not be parsed and is likely not a UCI response.
    #[error("unrecognized UCI response: {line:?}")]
    UnrecognizedResponse { line: String },

    /// The provided line is UCI, but was given invalid arguments.
    #[error("invalid argument {arg:?} to {line:?}")]
    InvalidArgument { line: String, arg: String },

    /// The provided line is UCI, but was not given enough arguments.
    #[error("insufficient arguments for {line:?}")]
    InsufficientArguments { line: String },
}

/// Errors that can occur while running or talking to an engine process.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The executable could not be started.
    #[error("failed to spawn engine at {path:?}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The engine did not send the expected handshake token in time.
    #[error("engine did not answer with {expected:?} within {budget:?}")]
    HandshakeTimeout {
        expected: &'static str,
        budget: Duration,
    },

    /// The engine closed its output before sending the expected handshake token.
    #[error("engine closed its output before answering with {expected:?}")]
    HandshakeProtocol { expected: &'static str },

    /// Reading or writing failed during the handshake.
    #[error("I/O failure during handshake: {0}")]
    Handshake(#[source] io::Error),

    /// A client operation was attempted in a state that does not allow it.
    #[error("operation not allowed while the client is {0:?}")]
    InvalidState(ClientState),

    /// A `setoption` command could not be written.
    #[error("failed to configure engine: {0}")]
    Configuration(#[source] io::Error),

    /// Reading or writing failed before the engine sent `bestmove`.
    #[error("engine failed during analysis: {0}")]
    Analysis(#[source] io::Error),

    /// Analysis was requested while no ready engine is bound.
    #[error("engine is disabled")]
    NotReady,

    /// The engine is enabled but no executable path is configured.
    #[error("engine path is not configured")]
    MissingExecutable,

    /// A freshly spawned engine could not be brought to the ready state.
    #[error("failed to initialize engine at {path:?}: {source}")]
    Initialization {
        path: String,
        #[source]
        source: Box<EngineError>,
    },

    /// A queued request was dropped because its engine was replaced or shut down.
    #[error("analysis request was abandoned before it ran")]
    Abandoned,

    /// The controller no longer accepts work.
    #[error("engine controller has shut down")]
    ShutDown,

    /// The engine ignored `quit` and had to be killed.
    #[error("engine did not exit within {grace:?} and was killed")]
    ShutdownForced { grace: Duration },

    /// The analysis worker thread could not be started.
    #[error("failed to start analysis worker: {0}")]
    Worker(#[source] io::Error),
}
