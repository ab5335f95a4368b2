/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{convert::Infallible, fmt, str::FromStr, time::Duration};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::UciCommand;

/// Name of the UCI option controlling playing strength.
pub const SKILL_LEVEL_OPTION: &str = "Skill Level";

/// Name of the UCI option controlling the number of search threads.
pub const THREADS_OPTION: &str = "Threads";

/// Name of the UCI option controlling the hash table size, in MB.
pub const HASH_OPTION: &str = "Hash";

/// Highest value accepted by [`SKILL_LEVEL_OPTION`].
pub const MAX_SKILL_LEVEL: u8 = 20;

/// One of the two sides of a chessboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Color {
    White,
    Black,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => write!(f, "white"),
            Self::Black => write!(f, "black"),
        }
    }
}

/// Which side, if any, the engine plays in a game.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PlaysAs {
    /// The engine is only used for analysis.
    #[default]
    Disabled,
    White,
    Black,
}

impl PlaysAs {
    /// The side the engine moves for, if any.
    pub const fn color(self) -> Option<Color> {
        match self {
            Self::Disabled => None,
            Self::White => Some(Color::White),
            Self::Black => Some(Color::Black),
        }
    }
}

impl FromStr for PlaysAs {
    type Err = Infallible;
    /// Case-insensitively accepts `white` and `black`; anything else means [`PlaysAs::Disabled`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let side = match s.trim().to_ascii_lowercase().as_str() {
            "white" => Self::White,
            "black" => Self::Black,
            _ => Self::Disabled,
        };
        Ok(side)
    }
}

/// A snapshot of the user's engine configuration.
///
/// The controller compares snapshots for equality to skip no-op reconfiguration,
/// so this is treated as an immutable value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "camelCase", default)
)]
pub struct EngineSettings {
    /// Whether an engine process should be running at all.
    pub enabled: bool,

    /// Path of the engine executable.
    pub executable_path: String,

    /// Which side the engine plays.
    pub plays_as: PlaysAs,

    /// Thinking budget handed to `go movetime` for every analysis.
    pub thinking_time_ms: u64,

    /// Playing strength, `0..=20`.
    pub skill_level: u8,

    /// Number of search threads used by the engine.
    pub threads: u32,

    /// Size of the engine's hash table, in MB.
    #[cfg_attr(feature = "serde", serde(rename = "hashSizeMB"))]
    pub hash_size_mb: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            executable_path: String::new(),
            plays_as: PlaysAs::Disabled,
            thinking_time_ms: 1000,
            skill_level: MAX_SKILL_LEVEL,
            threads: 1,
            hash_size_mb: 128,
        }
    }
}

impl EngineSettings {
    /// Default settings with the engine enabled at `path`.
    pub fn enabled_at(path: impl Into<String>) -> Self {
        Self {
            enabled: true,
            executable_path: path.into(),
            ..Self::default()
        }
    }

    /// Consumes `self` and sets the `enabled` flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Consumes `self` and sets the executable path.
    pub fn executable_path(mut self, path: impl Into<String>) -> Self {
        self.executable_path = path.into();
        self
    }

    /// Consumes `self` and sets the side the engine plays.
    pub fn plays_as(mut self, plays_as: PlaysAs) -> Self {
        self.plays_as = plays_as;
        self
    }

    /// Consumes `self` and sets the thinking time, in milliseconds.
    pub fn thinking_time_ms(mut self, ms: u64) -> Self {
        self.thinking_time_ms = ms;
        self
    }

    /// Consumes `self` and sets the skill level.
    pub fn skill_level(mut self, level: u8) -> Self {
        self.skill_level = level;
        self
    }

    /// Consumes `self` and sets the thread count.
    pub fn threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    /// Consumes `self` and sets the hash size, in MB.
    pub fn hash_size_mb(mut self, mb: u32) -> Self {
        self.hash_size_mb = mb;
        self
    }

    /// The thinking time as a [`Duration`], never zero.
    pub fn thinking_time(&self) -> Duration {
        Duration::from_millis(self.thinking_time_ms.max(1))
    }

    /// The `setoption` commands that push these settings to an engine, clamped to legal values.
    pub fn option_commands(&self) -> [UciCommand; 3] {
        [
            UciCommand::set_option(SKILL_LEVEL_OPTION, self.skill_level.min(MAX_SKILL_LEVEL)),
            UciCommand::set_option(THREADS_OPTION, self.threads.max(1)),
            UciCommand::set_option(HASH_OPTION, self.hash_size_mb.max(1)),
        ]
    }
}
