//! AGI response-line parsing
//!
//! Asterisk answers every command with a single line of the form
//! `200 result=<token>[ (<payload>)]`. The result token is usually a signed
//! integer, but a handful of commands (`GET DATA`) return the digits the
//! caller pressed — and a digit string with a leading zero must survive as a
//! string, not be collapsed to an integer. [`AgiValue`] keeps the two cases
//! apart as an explicit tagged variant.

use crate::{
    constants::{STATUS_SUCCESS, TIMEOUT_MARKER},
    error::{AgiError, AgiResult},
};
use std::fmt;

/// Native result of an AGI command — signed integer or literal digit string.
///
/// The string case exists for DTMF capture: `result=0123` means the caller
/// pressed `0`, `1`, `2`, `3`, and coercing that to `123` loses a digit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgiValue {
    /// Signed integer result (the common case)
    Int(i64),
    /// Literal digit/DTMF string with a significant leading zero
    Str(String),
}

impl AgiValue {
    /// Integer value, if this is the integer variant.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AgiValue::Int(n) => Some(*n),
            AgiValue::Str(_) => None,
        }
    }

    /// String value, if this is the string variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AgiValue::Int(_) => None,
            AgiValue::Str(s) => Some(s),
        }
    }

    /// `true` when the value is the integer variant and equals `n`.
    pub fn is_int(&self, n: i64) -> bool {
        self.as_int() == Some(n)
    }
}

impl fmt::Display for AgiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgiValue::Int(n) => write!(f, "{}", n),
            AgiValue::Str(s) => f.write_str(s),
        }
    }
}

/// A decoded AGI response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedResult {
    /// Three-digit status code (always 200 for a decodable response)
    pub status: u16,
    /// The `result=` token, integer or literal digit string
    pub native: AgiValue,
    /// Trailing parenthetical after the result token, when present
    /// (a variable's value, a database entry, a decoded character name)
    pub payload: Option<String>,
}

fn token_char(c: char) -> bool {
    c.is_ascii_digit() || c == '*' || c == '#'
}

/// Decode one response line into a [`DecodedResult`].
///
/// Classification rules:
/// - status ≠ 200, or no parseable `result=` token: [`AgiError::Command`]
/// - status 200 with the literal `(timeout)` marker: [`AgiError::Timeout`]
/// - `result=0<digits>` (leading zero, length > 1, digits/`*`/`#` only):
///   decoded as [`AgiValue::Str`], leading zero preserved
/// - any other token: decoded as [`AgiValue::Int`] from its leading integer
///
/// The `result=` marker is matched case-insensitively, as Asterisk's own
/// test tooling is not consistent about its casing.
pub fn decode_response_line(line: &str) -> AgiResult<DecodedResult> {
    let line = line.trim_end_matches(['\r', '\n']);

    let status: u16 = line
        .get(..3)
        .and_then(|s| s.parse().ok())
        .filter(|_| matches!(line.as_bytes().get(3), None | Some(b' ')))
        .ok_or_else(|| AgiError::command("invalid or unparseable response", line))?;

    if status != STATUS_SUCCESS {
        return Err(AgiError::command("invalid or unparseable response", line));
    }

    if line.contains(TIMEOUT_MARKER) {
        return Err(AgiError::Timeout {
            raw: line.to_string(),
        });
    }

    // "result=" offset is byte-stable under ASCII lowercasing
    let marker = line
        .to_ascii_lowercase()
        .find("result=")
        .ok_or_else(|| AgiError::command("invalid or unparseable response", line))?;
    let rest = &line[marker + "result=".len()..];

    let mut token_len = 0;
    for (i, c) in rest.char_indices() {
        if (i == 0 && c == '-') || token_char(c) {
            token_len = i + c.len_utf8();
        } else {
            break;
        }
    }
    let token = &rest[..token_len];

    let native = if token.starts_with('0') && token.len() > 1 {
        AgiValue::Str(token.to_string())
    } else {
        let digits_end = token
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
            .map(|(i, _)| i)
            .unwrap_or(token.len());
        let parsed = token[..digits_end].parse::<i64>().map_err(|_| {
            AgiError::command("invalid or unparseable response", line)
        })?;
        AgiValue::Int(parsed)
    };

    let after_token = &rest[token_len..];
    let payload = match (after_token.find('('), after_token.rfind(')')) {
        (Some(open), Some(close)) if close > open => {
            Some(after_token[open + 1..close].to_string())
        }
        _ => None,
    };

    Ok(DecodedResult {
        status,
        native,
        payload,
    })
}
