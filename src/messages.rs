/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{fmt, str::FromStr, time::Duration};

use crate::{parse_uci_response, UciParseError};

/*************************************************************************************************/
/*                                 GUI TO ENGINE COMMUNICATION                                   */
/*************************************************************************************************/

/// A command sent from this client to an engine.
///
/// Only the subset needed to hand a single position to the engine is modelled.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum UciCommand {
    /// Ask the engine to switch to UCI mode.
    ///
    /// # Command structure:
    /// ```text
    /// uci
    /// ```
    ///
    /// The engine identifies itself, lists its options and then answers with `uciok`.
    Uci,

    /// Synchronize with the engine.
    ///
    /// # Command structure:
    /// ```text
    /// isready
    /// ```
    ///
    /// Must always be answered with `readyok`.
    IsReady,

    /// Modify an option in the engine.
    ///
    /// # Command structure:
    /// ```text
    /// setoption name <id> [value <x>]
    /// ```
    ///
    /// Only sent while the engine is not searching.
    SetOption {
        /// The name of the engine parameter to modify, e.g. `Skill Level`.
        name: String,

        /// If provided, the new value for the specified parameter option.
        value: Option<String>,
    },

    /// Set up the position to search.
    ///
    /// # Command structure:
    /// ```text
    /// position fen <fen>
    /// ```
    Position {
        /// The FEN string of the position.
        fen: String,
    },

    /// Start a search with a fixed time budget.
    ///
    /// # Command structure:
    /// ```text
    /// go movetime <x>
    /// ```
    ///
    /// The engine answers with any number of `info` lines followed by `bestmove`.
    Go {
        /// How long the engine may think, sent in whole milliseconds.
        movetime: Duration,
    },

    /// Ask the engine to exit as soon as possible.
    ///
    /// # Command structure:
    /// ```text
    /// quit
    /// ```
    Quit,
}

impl UciCommand {
    /// Convenience constructor for [`UciCommand::SetOption`] with a value.
    pub fn set_option(name: impl fmt::Display, value: impl fmt::Display) -> Self {
        Self::SetOption {
            name: name.to_string(),
            value: Some(value.to_string()),
        }
    }
}

impl fmt::Display for UciCommand {
    /// Formats this [`UciCommand`] exactly as it is written to the engine, minus the newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use UciCommand::*;
        match self {
            Uci => write!(f, "uci"),

            IsReady => write!(f, "isready"),

            SetOption { name, value } => {
                if let Some(value) = value {
                    write!(f, "setoption name {name} value {value}")
                } else {
                    write!(f, "setoption name {name}")
                }
            }

            Position { fen } => write!(f, "position fen {fen}"),

            Go { movetime } => write!(f, "go movetime {}", movetime.as_millis()),

            Quit => write!(f, "quit"),
        }
    }
}

/*************************************************************************************************/
/*                                 ENGINE TO GUI COMMUNICATION                                   */
/*************************************************************************************************/

/// # Responses sent from the engine via its `stdout`.
///
/// Lines that do not match one of these shapes fail to parse and are ignored
/// by [`UciClient`](crate::UciClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciResponse {
    /// ```text
    /// id [name <x> | author <x>]
    /// ```
    Id(UciIdInfo),

    /// ```text
    /// uciok
    /// ```
    UciOk,

    /// ```text
    /// readyok
    /// ```
    ReadyOk,

    /// ```text
    /// bestmove <move_1> [ponder <move_2>]
    /// ```
    ///
    /// `bestmove (none)` and the null move `0000` parse with `bestmove: None`.
    BestMove {
        bestmove: Option<String>,
        ponder: Option<String>,
    },

    /// ```text
    /// info [depth <x>] [seldepth <x>] [time <x>] [nodes <x>] [multipv <x>] [score [cp <x> | mate <y>] [lowerbound | upperbound]] [hashfull <x>] [nps <x>] [pv <move_1> [... <move_i>]] [string <str>]
    /// ```
    Info(Box<UciInfo>),
}

impl UciResponse {
    /// Attempt to parse `input` into a valid [`UciResponse`].
    #[inline(always)]
    pub fn new(input: &str) -> Result<Self, UciParseError> {
        parse_uci_response(input)
    }
}

impl FromStr for UciResponse {
    type Err = UciParseError;
    /// Alias for [`UciResponse::new`].
    #[inline(always)]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for UciResponse {
    /// Responses are formatted the way an engine would print them.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id {id}"),
            Self::UciOk => write!(f, "uciok"),
            Self::ReadyOk => write!(f, "readyok"),
            Self::BestMove { bestmove, ponder } => match (bestmove, ponder) {
                (Some(b), Some(p)) => write!(f, "bestmove {b} ponder {p}"),
                (Some(b), None) => write!(f, "bestmove {b}"),
                (None, Some(p)) => write!(f, "bestmove (none) ponder {p}"),
                (None, None) => write!(f, "bestmove (none)"),
            },
            Self::Info(info) => write!(f, "info{info}"),
        }
    }
}

/// The two halves of the engine's `id` response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UciIdInfo {
    /// `id name <x>`
    Name(String),

    /// `id author <x>`
    Author(String),
}

impl fmt::Display for UciIdInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "name {name}"),
            Self::Author(author) => write!(f, "author {author}"),
        }
    }
}

/// Bounds for the `score` argument of the `info` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UciBound {
    /// The score is just a lowerbound.
    Lowerbound,

    /// The score is just an upperbound.
    Upperbound,
}

impl fmt::Display for UciBound {
    /// Formats as either `upperbound` or `lowerbound`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lowerbound => write!(f, "lowerbound"),
            Self::Upperbound => write!(f, "upperbound"),
        }
    }
}

/// Represents the type of score for the `score` argument of the `info` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UciScoreType {
    /// The score from the engine's point of view in centipawns.
    Centipawns,

    /// Mate in `<y>` moves (not plies).
    Mate,
}

impl fmt::Display for UciScoreType {
    /// Formats as either `cp` or `mate`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Centipawns => write!(f, "cp"),
            Self::Mate => write!(f, "mate"),
        }
    }
}

/// A score reported by the engine in an `info` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UciScore {
    /// The score value, which is either a centipawn value or moves-to-mate,
    /// depending on the value of `score_type`.
    pub score: i32,

    /// Either `cp` or `mate`.
    pub score_type: UciScoreType,

    /// Either `lowerbound` or `upperbound`.
    pub bound: Option<UciBound>,
}

impl UciScore {
    /// Construct a new [`UciScore`] with the provided `score`, `score_type`, and
    /// `bound`.
    pub const fn new(score: i32, score_type: UciScoreType, bound: Option<UciBound>) -> Self {
        Self {
            score,
            score_type,
            bound,
        }
    }

    /// Construct a new [`UciScore`] with `score_type` [`UciScoreType::Centipawns`].
    pub const fn cp(score: i32) -> Self {
        Self::new(score, UciScoreType::Centipawns, None)
    }

    /// Construct a new [`UciScore`] with `score_type` [`UciScoreType::Mate`].
    pub const fn mate(moves_to_mate: i32) -> Self {
        Self::new(moves_to_mate, UciScoreType::Mate, None)
    }

    /// Consumes `self` and appends the provided [`UciBound`] onto `self`.
    pub const fn with_bound(mut self, bound: UciBound) -> Self {
        self.bound = Some(bound);
        self
    }

    /// Renders this score for humans.
    ///
    /// Centipawns become pawns with two decimals (`150` is `"1.50"`, `-5` is `"-0.05"`).
    /// Mate scores become `"Mate in <y>"`, keeping the sign of `y`.
    pub fn evaluation(&self) -> String {
        match self.score_type {
            UciScoreType::Centipawns => {
                let sign = if self.score < 0 { "-" } else { "" };
                let cp = self.score.unsigned_abs();
                format!("{sign}{}.{:02}", cp / 100, cp % 100)
            }
            UciScoreType::Mate => format!("Mate in {}", self.score),
        }
    }
}

impl fmt::Display for UciScore {
    /// Formats as `<cp <x> | mate <y>> [lowerbound | upperbound]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(bound) = &self.bound {
            write!(f, "{} {} {bound}", self.score_type, self.score)
        } else {
            write!(f, "{} {}", self.score_type, self.score)
        }
    }
}

/// The parts of an `info` line this client understands.
///
/// Numeric fields are kept as the raw tokens the engine sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UciInfo {
    /// Search depth (in plies).
    pub depth: Option<String>,

    /// Selective search depth (in plies).
    pub seldepth: Option<String>,

    /// The time searched (in ms).
    pub time: Option<String>,

    /// Nodes searched.
    pub nodes: Option<String>,

    /// Index of the line in multi-pv mode.
    pub multipv: Option<String>,

    /// `cp <x>` or `mate <y>`, optionally bounded.
    pub score: Option<UciScore>,

    /// The hash is `x` permill full.
    pub hashfull: Option<String>,

    /// Nodes per second searched.
    pub nps: Option<String>,

    /// The best line found.
    pub pv: Vec<String>,

    /// Free text; consumes the rest of the line.
    pub string: Option<String>,
}

impl UciInfo {
    /// Creates a new, empty, [`UciInfo`] struct.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes `self` and adds the provided `depth` value.
    pub fn depth(mut self, depth: impl fmt::Display) -> Self {
        self.depth = Some(depth.to_string());
        self
    }

    /// Consumes `self` and adds the provided `score` value.
    pub fn score(mut self, score: impl Into<UciScore>) -> Self {
        self.score = Some(score.into());
        self
    }

    /// Consumes `self` and adds the provided `pv` value.
    pub fn pv<T: fmt::Display>(mut self, pv: impl IntoIterator<Item = T>) -> Self {
        self.pv = pv.into_iter().map(|x| x.to_string()).collect();
        self
    }

    /// Consumes `self` and adds the provided `string` value.
    pub fn string(mut self, string: impl fmt::Display) -> Self {
        self.string = Some(string.to_string());
        self
    }
}

impl fmt::Display for UciInfo {
    /// Formats with a leading space before every present field, so that it can
    /// follow `info` directly.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("depth", &self.depth),
            ("seldepth", &self.seldepth),
            ("time", &self.time),
            ("nodes", &self.nodes),
            ("multipv", &self.multipv),
        ];
        for (name, field) in fields {
            if let Some(x) = field {
                write!(f, " {name} {x}")?;
            }
        }

        if let Some(score) = &self.score {
            write!(f, " score {score}")?;
        }

        if let Some(x) = &self.hashfull {
            write!(f, " hashfull {x}")?;
        }

        if let Some(x) = &self.nps {
            write!(f, " nps {x}")?;
        }

        if !self.pv.is_empty() {
            write!(f, " pv")?;
            for mv in &self.pv {
                write!(f, " {mv}")?;
            }
        }

        // `string` must come last, since it consumes the rest of the line
        if let Some(string) = &self.string {
            write!(f, " string {string}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display() {
        assert_eq!(UciCommand::Uci.to_string(), "uci");
        assert_eq!(UciCommand::IsReady.to_string(), "isready");
        assert_eq!(
            UciCommand::set_option("Skill Level", 12).to_string(),
            "setoption name Skill Level value 12"
        );
        assert_eq!(
            UciCommand::SetOption {
                name: "Clear Hash".into(),
                value: None
            }
            .to_string(),
            "setoption name Clear Hash"
        );
        assert_eq!(
            UciCommand::Position {
                fen: "8/8/8/8/8/8/8/K6k w - - 0 1".into()
            }
            .to_string(),
            "position fen 8/8/8/8/8/8/8/K6k w - - 0 1"
        );
        assert_eq!(
            UciCommand::Go {
                movetime: Duration::from_millis(2500)
            }
            .to_string(),
            "go movetime 2500"
        );
        assert_eq!(UciCommand::Quit.to_string(), "quit");
    }

    #[test]
    fn test_centipawn_evaluation() {
        assert_eq!(UciScore::cp(150).evaluation(), "1.50");
        assert_eq!(UciScore::cp(-5).evaluation(), "-0.05");
        assert_eq!(UciScore::cp(0).evaluation(), "0.00");
        assert_eq!(UciScore::cp(-250).evaluation(), "-2.50");
        assert_eq!(UciScore::cp(7).evaluation(), "0.07");
        assert_eq!(
            UciScore::cp(i32::MIN).evaluation(),
            "-21474836.48",
            "extreme values must not overflow"
        );
    }

    #[test]
    fn test_mate_evaluation() {
        assert_eq!(UciScore::mate(3).evaluation(), "Mate in 3");
        assert_eq!(UciScore::mate(-2).evaluation(), "Mate in -2");
        assert_eq!(
            UciScore::mate(1).with_bound(UciBound::Lowerbound).evaluation(),
            "Mate in 1"
        );
    }

    #[test]
    fn test_response_display() {
        let info = UciInfo::new()
            .depth(12)
            .score(UciScore::cp(31).with_bound(UciBound::Upperbound))
            .pv(["e2e4", "e7e5"])
            .string("hello there");
        assert_eq!(
            UciResponse::Info(Box::new(info)).to_string(),
            "info depth 12 score cp 31 upperbound pv e2e4 e7e5 string hello there"
        );

        let best = UciResponse::BestMove {
            bestmove: None,
            ponder: None,
        };
        assert_eq!(best.to_string(), "bestmove (none)");

        let id = UciResponse::Id(UciIdInfo::Name("Stockfish 16".into()));
        assert_eq!(id.to_string(), "id name Stockfish 16");
    }
}
