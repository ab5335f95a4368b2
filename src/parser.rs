/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1},
    character::complete::{anychar, digit1, multispace0, multispace1, one_of},
    combinator::{cut, eof, map, map_res, opt, recognize, value},
    multi::{many0, many0_count, many1_count},
    sequence::{delimited, pair, preceded, terminated, tuple},
    Err, IResult,
};

use crate::{UciBound, UciIdInfo, UciInfo, UciParseError, UciResponse, UciScore, UciScoreType};

/// Top-level parser to convert a line printed by an engine into a [`UciResponse`].
///
/// See also [`UciResponse::new`]
pub(crate) fn parse_uci_response(input: &str) -> Result<UciResponse, UciParseError> {
    let mut parser = preceded(multispace0, parse_response);

    parser(input).map(|(_rest, resp)| resp).map_err(|e| match e {
        // A recoverable error means that the line was not recognized
        Err::Error(_) | Err::Incomplete(_) => UciParseError::UnrecognizedResponse {
            line: input.to_string(),
        },

        // A failure means that the response was recognized, but the argument(s) provided to it were invalid.
        Err::Failure(e) => {
            // Find the location of where this error originated
            let place = input.rfind(e.input).unwrap_or_default();

            // If the location of this error is NOT at the end of the input string, subtract 1 from it (to get rid of trailing whitespace)
            let place = if place < input.len() {
                place.saturating_sub(1)
            } else {
                place
            };

            // Everything that was successfully parsed, and everything that wasn't.
            let line = input.get(..place).unwrap_or(input).trim_end().to_string();
            let arg = e.input.trim().to_string();

            if arg.is_empty() {
                UciParseError::InsufficientArguments { line }
            } else {
                UciParseError::InvalidArgument { line, arg }
            }
        }
    })
}

/// Parses a single-word [`UciResponse`] like `uciok` or `readyok`.
fn single_response<'a>(
    ident: &'static str,
    resp: UciResponse,
) -> impl FnMut(&'a str) -> IResult<&'a str, UciResponse> {
    value(resp, term(ident))
}

/// Parses a multi-word [`UciResponse`] like `info` or `bestmove`.
fn multi_response<'a, F>(
    ident: &'static str,
    parser: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, UciResponse>
where
    F: FnMut(&'a str) -> IResult<&'a str, UciResponse>,
{
    preceded(term(ident), cut(parser))
}

/// Parses a single UCI response
fn parse_response(input: &str) -> IResult<&str, UciResponse> {
    alt((
        multi_response("id", parse_id_args),
        single_response("uciok", UciResponse::UciOk),
        single_response("readyok", UciResponse::ReadyOk),
        multi_response("bestmove", parse_bestmove_args),
        multi_response("info", parse_info_args),
    ))(input)
}

/// Parses arguments to the `id` response.
fn parse_id_args(input: &str) -> IResult<&str, UciResponse> {
    map(
        alt((
            map(rest_after("name"), |s| UciIdInfo::Name(s.to_string())),
            map(rest_after("author"), |s| UciIdInfo::Author(s.to_string())),
        )),
        UciResponse::Id,
    )(input)
}

/// Parses arguments to the `bestmove` response.
///
/// Both moves are optional, so a bare `bestmove` parses as a response without a move.
fn parse_bestmove_args(input: &str) -> IResult<&str, UciResponse> {
    let ponder = preceded(term("ponder"), word);

    map(pair(opt(word), opt(ponder)), |(bestmove, ponder)| {
        UciResponse::BestMove {
            bestmove: bestmove.and_then(move_or_none),
            ponder: ponder.and_then(move_or_none),
        }
    })(input)
}

/// Parses arguments to the `info` response.
fn parse_info_args(input: &str) -> IResult<&str, UciResponse> {
    let mut info = UciInfo::default();

    // Arguments to `info` can be in any order, and anything unknown is skipped one word at a time.
    // Only a malformed score fails the whole line.
    let (input, _count) = many0_count(alt((
        map(word_after("depth"), |x| info.depth = Some(x.to_string())),
        map(word_after("seldepth"), |x| info.seldepth = Some(x.to_string())),
        map(word_after("time"), |x| info.time = Some(x.to_string())),
        map(word_after("nodes"), |x| info.nodes = Some(x.to_string())),
        map(word_after("multipv"), |x| info.multipv = Some(x.to_string())),
        map(score_after("score"), |x| info.score = Some(x)),
        map(word_after("hashfull"), |x| info.hashfull = Some(x.to_string())),
        map(word_after("nps"), |x| info.nps = Some(x.to_string())),
        map(moves_after("pv"), |x| {
            info.pv = x.into_iter().map(str::to_string).collect()
        }),
        map(rest_after("string"), |x| info.string = Some(x.to_string())),
        map(word, |_| ()),
    )))(input)?;

    Ok((input, UciResponse::Info(Box::new(info))))
}

/// Maps the placeholders engines print when they have no move to `None`.
fn move_or_none(mv: &str) -> Option<String> {
    match mv {
        "(none)" | "0000" => None,
        mv => Some(mv.to_string()),
    }
}

/// A combinator that takes an identifier `ident` and produces a parser that
/// parses ONLY `ident`, consuming any leading/trailing whitespace and failing if
/// anything other than EOF or whitespace follows `ident`.
fn term<'a>(ident: &'a str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    delimited(multispace0, tag(ident), alt((eof, multispace1)))
}

/// Parses a single whitespace-delimited token.
fn word(input: &str) -> IResult<&str, &str> {
    delimited(multispace0, take_till1(char::is_whitespace), multispace0)(input)
}

/// A combinator that parses the single token following `ident`.
///
/// A missing token is a recoverable error, so `ident` itself gets skipped as an unknown word.
fn word_after<'a>(ident: &'a str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(term(ident), word)
}

/// A parser to consume the remainder of `input`, erroring with a [`nom::Err::Failure`] if there is no remaining input.
fn rest_nonempty(input: &str) -> IResult<&str, &str> {
    recognize(cut(many1_count(anychar)))(input)
}

/// A combinator that takes an identifier `ident` and produces a parser that discards `ident`
/// and consumes the rest of the input, failing if there is no more input to consume.
fn rest_after<'a>(ident: &'a str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(term(ident), map(rest_nonempty, str::trim))
}

/// Parses a possibly-empty list of moves after `ident`
fn moves_after<'a>(ident: &'a str) -> impl FnMut(&'a str) -> IResult<&'a str, Vec<&'a str>> {
    preceded(
        term(ident),
        cut(many0(delimited(multispace0, uci_move, multispace0))),
    )
}

/// Parses a signed base-10 number that must be followed by whitespace or EOF.
fn parse_signed(input: &str) -> IResult<&str, i32> {
    terminated(
        map_res(recognize(pair(opt(one_of("+-")), digit1)), |s: &str| {
            s.parse::<i32>()
        }),
        alt((eof, multispace1)),
    )(input)
}

/// Parses `<cp <x> | mate <y>> [lowerbound | upperbound]`.
fn parse_score(input: &str) -> IResult<&str, UciScore> {
    let score_type = alt((
        value(UciScoreType::Centipawns, term("cp")),
        value(UciScoreType::Mate, term("mate")),
    ));

    let bound = alt((
        value(UciBound::Lowerbound, term("lowerbound")),
        value(UciBound::Upperbound, term("upperbound")),
    ));

    map(
        tuple((score_type, parse_signed, opt(bound))),
        |(score_type, score, bound)| UciScore::new(score, score_type, bound),
    )(input)
}

/// Parses a [`UciScore`] following `ident`, failing the whole line if the score is malformed.
fn score_after<'a>(ident: &'a str) -> impl FnMut(&'a str) -> IResult<&'a str, UciScore> {
    preceded(term(ident), cut(parse_score))
}

/// Parses a UCI move, which is in the format `<start square><end square>[promotion]`.
///
/// This can also parse a nullmove, which is the string `0000`.
fn uci_move(input: &str) -> IResult<&str, &str> {
    // [a-h]
    #[inline(always)]
    fn file(input: &str) -> IResult<&str, char> {
        one_of("abcdefgh")(input)
    }

    // [1-8]
    #[inline(always)]
    fn rank(input: &str) -> IResult<&str, char> {
        one_of("12345678")(input)
    }

    // [a-h][1-8]
    #[inline(always)]
    fn square(input: &str) -> IResult<&str, (char, char)> {
        pair(file, rank)(input)
    }

    // [qnrb], either case
    let piece = one_of("QqNnRrBb");

    alt((
        recognize(tuple((square, square, opt(piece)))),
        recognize(tag("0000")),
    ))(input)
}
