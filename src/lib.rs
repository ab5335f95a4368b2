/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

#![doc = include_str!("../README.md")]

/// Utilities related to parsing engine output.
mod parser;

/// Types representing the commands sent to an engine and the responses it prints.
pub mod messages;

/// Errors produced while parsing engine output or driving an engine process.
pub mod error;

/// The line-oriented transport to an engine, and how engines are launched.
pub mod process;

/// A single UCI session with one engine process.
///
/// [`UciClient`] owns the process, performs the `uci`/`isready` handshake and runs
/// one search at a time. It is synchronous and not meant to be shared between threads;
/// see [`EngineController`] for that.
pub mod client;

/// User-facing engine configuration.
pub mod settings;

/// Keeps an engine process in sync with the user's settings and serializes analysis
/// requests onto a background worker.
pub mod controller;

pub use client::*;
pub use controller::*;
pub use error::*;
pub use messages::*;
pub use parser::*;
pub use process::*;
pub use settings::*;
