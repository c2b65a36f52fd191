//! Command response type returned by every session operation.

use crate::protocol::AgiValue;

/// Result of one AGI command.
///
/// `native` is the raw result token Asterisk returned; `success` applies the
/// command-specific mapping (success is not uniformly `0` or `1` across the
/// command vocabulary); `data` carries the command's useful product when it
/// has one — a pressed DTMF digit, a variable's value, a channel status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgiResponse {
    /// Native result token, integer or literal digit string
    pub native: AgiValue,
    /// Whether the command succeeded per its own result mapping
    pub success: bool,
    /// Command-specific data, when the command produced any
    pub data: Option<AgiValue>,
}

impl AgiResponse {
    /// Response with the given native result, not (yet) successful, no data.
    pub(crate) fn new(native: AgiValue) -> Self {
        Self {
            native,
            success: false,
            data: None,
        }
    }

    /// Whether the command succeeded.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Data as a string slice, if string data is present.
    pub fn data_str(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.as_str())
    }

    /// Data as an integer, if integer data is present.
    pub fn data_int(&self) -> Option<i64> {
        self.data.as_ref().and_then(|d| d.as_int())
    }

    /// First character of the data, for single-DTMF commands.
    pub fn data_char(&self) -> Option<char> {
        self.data_str().and_then(|s| s.chars().next())
    }
}
