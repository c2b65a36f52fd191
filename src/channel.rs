//! Channel-related data types extracted from AGI responses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Channel status as reported by `CHANNEL STATUS` — carried in the native
/// result as an integer in `0..=7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[repr(u8)]
pub enum ChannelStatus {
    /// Channel is down and available
    DownAvailable = 0,
    /// Channel is down, but reserved
    DownReserved = 1,
    /// Channel is off hook
    OffHook = 2,
    /// Digits (or equivalent) have been dialed
    DigitsDialed = 3,
    /// Line is ringing
    LineRinging = 4,
    /// Remote end is ringing
    RemoteRinging = 5,
    /// Line is up
    Up = 6,
    /// Line is busy
    Busy = 7,
}

impl ChannelStatus {
    /// Parse from the native integer result of `CHANNEL STATUS`.
    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            0 => Some(Self::DownAvailable),
            1 => Some(Self::DownReserved),
            2 => Some(Self::OffHook),
            3 => Some(Self::DigitsDialed),
            4 => Some(Self::LineRinging),
            5 => Some(Self::RemoteRinging),
            6 => Some(Self::Up),
            7 => Some(Self::Busy),
            _ => None,
        }
    }

    /// Integer value as Asterisk reports it.
    pub fn as_number(&self) -> u8 {
        *self as u8
    }

    /// Descriptive status string matching the historical AGI interface.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DownAvailable => "DOWN, AVAILABLE",
            Self::DownReserved => "DOWN, RESERVED",
            Self::OffHook => "OFF HOOK",
            Self::DigitsDialed => "DIGITS DIALED",
            Self::LineRinging => "LINE RINGING",
            Self::RemoteRinging => "REMOTE RINGING",
            Self::Up => "UP",
            Self::Busy => "BUSY",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an invalid channel status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChannelStatusError(pub String);

impl fmt::Display for ParseChannelStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown channel status: {}", self.0)
    }
}

impl std::error::Error for ParseChannelStatusError {}

impl FromStr for ChannelStatus {
    type Err = ParseChannelStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DOWN, AVAILABLE" => Ok(Self::DownAvailable),
            "DOWN, RESERVED" => Ok(Self::DownReserved),
            "OFF HOOK" => Ok(Self::OffHook),
            "DIGITS DIALED" => Ok(Self::DigitsDialed),
            "LINE RINGING" => Ok(Self::LineRinging),
            "REMOTE RINGING" => Ok(Self::RemoteRinging),
            "UP" => Ok(Self::Up),
            "BUSY" => Ok(Self::Busy),
            _ => Err(ParseChannelStatusError(s.to_string())),
        }
    }
}
