//! Dashboard/motion text protocol: command formatting and reply parsing
//!
//! Outgoing commands look like `Name(arg1,arg2,...)`. Replies look like
//! `status,{payload},EchoedName(args);`. Parsing here is purely textual; typed
//! interpretation of a payload (angles, poses, error tables) happens in the caller
//! through the `decode_*` helpers and the unit conversions below.

use crate::{Mg400Error, Result};
use regex::Regex;
use std::f64::consts::PI;
use std::fmt;
use std::sync::OnceLock;

/// Terminator of every dashboard reply.
pub const REPLY_TERMINATOR: char = ';';

pub fn mm_to_m(value: f64) -> f64 {
    value / 1000.0
}

pub fn m_to_mm(value: f64) -> f64 {
    value * 1000.0
}

pub fn deg_to_rad(value: f64) -> f64 {
    value * PI / 180.0
}

pub fn rad_to_deg(value: f64) -> f64 {
    value * 180.0 / PI
}

/// One command argument as it appears on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i64),
    /// Rendered with three decimals.
    Float(f64),
    Text(String),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(v) => write!(f, "{}", v),
            Arg::Float(v) => write!(f, "{:.3}", v),
            Arg::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::Int(v as i64)
    }
}

impl From<u8> for Arg {
    fn from(v: u8) -> Self {
        Arg::Int(v as i64)
    }
}

impl From<u32> for Arg {
    fn from(v: u32) -> Self {
        Arg::Int(v as i64)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Float(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Text(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Text(v)
    }
}

/// Reject NaN and infinite floats before they reach the wire.
pub fn check_args(name: &str, args: &[Arg]) -> Result<()> {
    match args.iter().find(|a| matches!(a, Arg::Float(v) if !v.is_finite())) {
        Some(bad) => Err(Mg400Error::InvalidArgument(format!("{} argument must be finite, got {}", name, bad))),
        None => Ok(()),
    }
}

/// Render `Name(arg1,arg2,...)` with no embedded whitespace.
pub fn format_command(name: &str, args: &[Arg]) -> String {
    let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    format!("{}({})", name, rendered.join(","))
}

/// A parsed dashboard reply. Not retained beyond the call that requested it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub code: i32,
    /// Raw text between the outer braces.
    pub payload: String,
    /// Echoed command, without the terminating `;`.
    pub echoed: String,
    pub line: String,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Name part of the echoed command (`GetAngle` for `GetAngle()`).
    pub fn echoed_name(&self) -> &str {
        self.echoed.split('(').next().unwrap_or("").trim()
    }

    pub fn scalars(&self) -> Result<Vec<f64>> {
        decode_scalars(&self.payload).map_err(|reason| Mg400Error::parse(&self.line, reason))
    }

    pub fn nested_ints(&self) -> Result<Vec<Vec<i64>>> {
        decode_nested(&self.payload).map_err(|reason| Mg400Error::parse(&self.line, reason))
    }

    /// Exactly `n` scalars, or a parse error naming the mismatch.
    pub fn fixed_scalars<const N: usize>(&self) -> Result<[f64; N]> {
        let values = self.scalars()?;
        let count = values.len();
        values
            .try_into()
            .map_err(|_| Mg400Error::parse(&self.line, format!("expected {} values, got {}", N, count)))
    }

    pub fn single_int(&self) -> Result<i64> {
        let [value] = self.fixed_scalars::<1>()?;
        if value.fract() != 0.0 {
            return Err(Mg400Error::parse(&self.line, "expected an integer value"));
        }
        Ok(value as i64)
    }
}

fn reply_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^(-?\d+),\{(.*)\},(.*);$").expect("reply pattern is a valid regex")
    })
}

fn nested_payload_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[?\s*\[[^\[\]]*\](\s*,\s*\[[^\[\]]*\])*\s*\]?$").expect("nested pattern is a valid regex")
    })
}

fn inner_list_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[([^\[\]]*)\]").expect("list pattern is a valid regex"))
}

/// Parse one reply line of the form `status,{payload},Echoed(args);`.
pub fn parse_reply(line: &str) -> Result<Reply> {
    let trimmed = line.trim_matches(|c: char| c.is_whitespace() || c == '\0');

    let captures = reply_pattern()
        .captures(trimmed)
        .ok_or_else(|| Mg400Error::parse(line, "expected `status,{payload},command;`"))?;

    let code = captures[1]
        .parse::<i32>()
        .map_err(|e| Mg400Error::parse(line, format!("bad status: {}", e)))?;

    Ok(Reply {
        code,
        payload: captures[2].trim().to_string(),
        echoed: captures[3].trim().to_string(),
        line: trimmed.to_string(),
    })
}

/// Flat comma-separated numbers. An empty payload decodes to no values.
pub fn decode_scalars(payload: &str) -> std::result::Result<Vec<f64>, String> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    if payload.contains(['[', ']']) {
        return Err("expected a flat list, found nested brackets".to_string());
    }

    payload
        .split(',')
        .map(|token| {
            let token = token.trim();
            token
                .parse::<f64>()
                .map_err(|_| format!("`{}` is not a number", token))
        })
        .collect()
}

/// Bracketed integer lists, e.g. `[[69,72],[1],[],[]]` or `[69,72],[1],[]`.
///
/// Every innermost `[...]` group becomes one entry, in order of appearance. Groups are
/// comma-separated and at most one outer bracket pair may wrap them.
pub fn decode_nested(payload: &str) -> std::result::Result<Vec<Vec<i64>>, String> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    if !nested_payload_pattern().is_match(payload) {
        return Err(format!("`{}` is not a list of bracketed groups", payload));
    }
    // The pattern allows each outer bracket on its own; both or neither must be present.
    if payload.matches('[').count() != payload.matches(']').count() {
        return Err(format!("unbalanced brackets in `{}`", payload));
    }

    let mut groups = Vec::new();
    for captures in inner_list_pattern().captures_iter(payload) {
        let group = captures[1]
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| t.parse::<i64>().map_err(|_| format!("`{}` is not an integer", t)))
            .collect::<std::result::Result<Vec<i64>, String>>()?;
        groups.push(group);
    }

    if groups.is_empty() {
        return Err("expected at least one bracketed list".to_string());
    }
    Ok(groups)
}
