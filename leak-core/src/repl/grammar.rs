//! Parser for operator command lines.
//!
//! Lines are parsed straight from `&str` with `winnow` primitives; the
//! command keyword is resolved through [`catalog`](super::catalog) so parsing
//! and help share one table.

use core::fmt;

use winnow::ascii::{digit1, space0};
use winnow::combinator::{eof, opt, preceded};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::take_while;

use super::catalog::{self, CommandTag};

/// Structured commands produced by the parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Start,
    Abort,
    Reset,
    Status,
    Config,
    Sample(SampleRequest),
    Fault(FaultKind),
    Help(Option<&'a str>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleRequest {
    Single,
    /// `rate_hz` falls back to the configured burst rate when omitted.
    Burst { count: u32, rate_hz: Option<u32> },
}

/// Faults an operator can inject into a simulated rig.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    Sensor,
    Valve,
    Overshoot,
    Clear,
}

impl FaultKind {
    pub const ALL: [FaultKind; 4] = [
        FaultKind::Sensor,
        FaultKind::Valve,
        FaultKind::Overshoot,
        FaultKind::Clear,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            FaultKind::Sensor => "sensor",
            FaultKind::Valve => "valve",
            FaultKind::Overshoot => "overshoot",
            FaultKind::Clear => "clear",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(keyword))
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Parse failures, borrowing the offending text from the input line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Empty,
    UnknownCommand(&'a str),
    Expected {
        expected: &'static str,
        found: Option<&'a str>,
    },
    InvalidNumber(&'a str),
    TrailingInput(&'a str),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => f.write_str("empty command"),
            ParseError::UnknownCommand(keyword) => write!(f, "unknown command `{keyword}`"),
            ParseError::Expected {
                expected,
                found: Some(found),
            } => write!(f, "expected {expected}, found `{found}`"),
            ParseError::Expected {
                expected,
                found: None,
            } => write!(f, "unexpected end of input, expected {expected}"),
            ParseError::InvalidNumber(text) => write!(f, "invalid number `{text}`"),
            ParseError::TrailingInput(text) => write!(f, "unexpected `{text}` after command"),
        }
    }
}

/// Parses one command line. Trailing CR/LF is ignored.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let mut input = line.trim_end_matches(['\r', '\n']);

    let mut probe = input;
    if end_of_line(&mut probe).is_ok() {
        return Err(ParseError::Empty);
    }

    let keyword = word(&mut input).map_err(|_| expected("command keyword", input))?;
    let spec = catalog::find(keyword).ok_or(ParseError::UnknownCommand(keyword))?;

    let command = match spec.tag {
        CommandTag::Start => Command::Start,
        CommandTag::Abort => Command::Abort,
        CommandTag::Reset => Command::Reset,
        CommandTag::Status => Command::Status,
        CommandTag::Config => Command::Config,
        CommandTag::Sample => Command::Sample(sample_request(&mut input)?),
        CommandTag::Fault => Command::Fault(fault_kind(&mut input)?),
        CommandTag::Help => Command::Help(opt(word).parse_next(&mut input).ok().flatten()),
    };

    if end_of_line(&mut input).is_err() {
        return Err(ParseError::TrailingInput(peek(input).unwrap_or(input)));
    }

    Ok(command)
}

fn sample_request<'a>(input: &mut &'a str) -> Result<SampleRequest, ParseError<'a>> {
    let mut probe = *input;
    let Ok(keyword) = word(&mut probe) else {
        return Ok(SampleRequest::Single);
    };
    if !keyword.eq_ignore_ascii_case("burst") {
        return Err(expected("`burst`", input));
    }
    *input = probe;

    let count = number(input)?.ok_or_else(|| expected("sample count", input))?;
    let rate_hz = number(input)?;
    Ok(SampleRequest::Burst { count, rate_hz })
}

fn fault_kind<'a>(input: &mut &'a str) -> Result<FaultKind, ParseError<'a>> {
    const EXPECTED: &str = "sensor, valve, overshoot or clear";

    let keyword = word(input).map_err(|_| expected(EXPECTED, input))?;
    FaultKind::from_keyword(keyword).ok_or(ParseError::Expected {
        expected: EXPECTED,
        found: Some(keyword),
    })
}

/// Optional unsigned integer; `Ok(None)` when the next token is not numeric.
fn number<'a>(input: &mut &'a str) -> Result<Option<u32>, ParseError<'a>> {
    let digits: Option<&str> = opt(preceded(space0, digit1::<_, ContextError>))
        .parse_next(input)
        .ok()
        .flatten();
    match digits {
        Some(text) => text
            .parse::<u32>()
            .map(Some)
            .map_err(|_| ParseError::InvalidNumber(text)),
        None => Ok(None),
    }
}

fn word<'a>(input: &mut &'a str) -> Result<&'a str, ContextError> {
    preceded(
        space0,
        take_while(1.., |c: char| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
        }),
    )
    .parse_next(input)
}

fn end_of_line(input: &mut &str) -> Result<(), ContextError> {
    (space0, eof).void().parse_next(input)
}

fn peek(input: &str) -> Option<&str> {
    input.split_ascii_whitespace().next()
}

fn expected<'a>(label: &'static str, input: &'a str) -> ParseError<'a> {
    ParseError::Expected {
        expected: label,
        found: peek(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    #[test]
    fn parses_bare_keywords() {
        assert_eq!(parse_ok("start"), Command::Start);
        assert_eq!(parse_ok("  ABORT  "), Command::Abort);
        assert_eq!(parse_ok("reset\r\n"), Command::Reset);
        assert_eq!(parse_ok("status"), Command::Status);
        assert_eq!(parse_ok("config"), Command::Config);
    }

    #[test]
    fn parses_sample_variants() {
        assert_eq!(parse_ok("sample"), Command::Sample(SampleRequest::Single));
        assert_eq!(
            parse_ok("sample burst 20"),
            Command::Sample(SampleRequest::Burst {
                count: 20,
                rate_hz: None
            })
        );
        assert_eq!(
            parse_ok("sample burst 100 860"),
            Command::Sample(SampleRequest::Burst {
                count: 100,
                rate_hz: Some(860)
            })
        );
    }

    #[test]
    fn sample_burst_requires_count() {
        assert_eq!(
            parse("sample burst"),
            Err(ParseError::Expected {
                expected: "sample count",
                found: None
            })
        );
        assert_eq!(
            parse("sample burst many"),
            Err(ParseError::Expected {
                expected: "sample count",
                found: Some("many")
            })
        );
        assert_eq!(
            parse("sample stream"),
            Err(ParseError::Expected {
                expected: "`burst`",
                found: Some("stream")
            })
        );
    }

    #[test]
    fn rejects_oversized_numbers() {
        assert_eq!(
            parse("sample burst 99999999999"),
            Err(ParseError::InvalidNumber("99999999999"))
        );
    }

    #[test]
    fn parses_fault_kinds() {
        assert_eq!(parse_ok("fault sensor"), Command::Fault(FaultKind::Sensor));
        assert_eq!(parse_ok("fault OVERSHOOT"), Command::Fault(FaultKind::Overshoot));
        assert!(matches!(
            parse("fault gremlin"),
            Err(ParseError::Expected {
                found: Some("gremlin"),
                ..
            })
        ));
        assert!(matches!(
            parse("fault"),
            Err(ParseError::Expected { found: None, .. })
        ));
    }

    #[test]
    fn parses_help_topic() {
        assert_eq!(parse_ok("help"), Command::Help(None));
        assert_eq!(parse_ok("help sample"), Command::Help(Some("sample")));
    }

    #[test]
    fn rejects_unknown_and_trailing_input() {
        assert_eq!(parse("reboot now"), Err(ParseError::UnknownCommand("reboot")));
        assert_eq!(parse("start now"), Err(ParseError::TrailingInput("now")));
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert!(matches!(
            parse("!start"),
            Err(ParseError::Expected {
                expected: "command keyword",
                ..
            })
        ));
    }
}
