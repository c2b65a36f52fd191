//! AGI command encoding
//!
//! Every session operation is a thin wrapper over an [`AgiCommand`] variant.
//! [`AgiCommand::to_wire_format`] validates the user-supplied fields and
//! produces the exact request line, so encoding the same command with the
//! same arguments is always byte-identical.

use crate::{
    constants::LINE_TERMINATOR,
    error::{AgiError, AgiResult},
};
use std::fmt;

/// Validate that a user-provided string contains no newline characters.
///
/// AGI requests are line-delimited; embedded newlines would allow injection
/// of arbitrary protocol commands.
fn validate_no_newlines(s: &str, context: &str) -> AgiResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(AgiError::InvalidArgument(format!(
            "{} must not contain newlines",
            context
        )));
    }
    Ok(())
}

/// Normalize an escape-digit set for the wire.
///
/// Accepts an optionally quoted set of DTMF digits, strips the quoting, and
/// re-emits it double-quoted (`""` when empty). Rejects anything outside the
/// DTMF alphabet `0-9 * # A-D`.
fn format_digits(digits: &str) -> AgiResult<String> {
    let stripped: String = digits.chars().filter(|c| *c != '\'' && *c != '"').collect();
    for c in stripped.chars() {
        if !(c.is_ascii_digit() || matches!(c, '*' | '#' | 'A'..='D' | 'a'..='d')) {
            return Err(AgiError::InvalidArgument(format!(
                "escape digits may only contain 0-9 * # A-D, got {:?}",
                c
            )));
        }
    }
    Ok(format!("\"{}\"", stripped))
}

/// Music-on-hold / TDD toggle argument.
///
/// The wire protocol takes the literal strings `on` and `off`; modeling the
/// toggle as an enum makes the invalid case unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    /// Enable (`on`)
    On,
    /// Disable (`off`)
    Off,
}

impl Toggle {
    /// Wire-format string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Toggle::On => "on",
            Toggle::Off => "off",
        }
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AGI command vocabulary.
///
/// Each variant maps to one command of the AGI protocol. Durations are taken
/// in seconds and converted to milliseconds on the wire;
/// [`WaitForDigit`](AgiCommand::WaitForDigit) takes milliseconds directly
/// (`-1` waits forever), as the protocol specifies.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AgiCommand {
    /// Answer the channel
    Answer,
    /// Query channel status (current channel when `None`)
    ChannelStatus { channel: Option<String> },
    /// Stream audio with caller-controlled ffwd/rewind/pause
    ControlStreamFile {
        file: String,
        digits: String,
        skip_ms: u32,
        ffchar: char,
        rewchar: char,
        pausechar: Option<char>,
    },
    /// Delete one ASTDB key
    DatabaseDel { family: String, key: String },
    /// Delete an ASTDB family or keytree
    DatabaseDelTree {
        family: String,
        keytree: Option<String>,
    },
    /// Read one ASTDB value
    DatabaseGet { family: String, key: String },
    /// Write one ASTDB value
    DatabasePut {
        family: String,
        key: String,
        value: String,
    },
    /// Execute a dialplan application
    Exec { application: String },
    /// Play a prompt and collect DTMF digits
    GetData {
        file: String,
        timeout_secs: Option<u32>,
        max_digits: Option<u32>,
    },
    /// Read a complex channel variable (with expression evaluation)
    GetFullVariable {
        name: String,
        channel: Option<String>,
    },
    /// Stream audio, wait up to a timeout for an escape digit
    GetOption {
        file: String,
        digits: String,
        timeout_secs: u32,
    },
    /// Read a channel variable
    GetVariable { name: String },
    /// Hang up a channel (current channel when `None`)
    Hangup { channel: Option<String> },
    /// Do nothing
    Noop { message: Option<String> },
    /// Receive one text character from the channel
    ReceiveChar { timeout_secs: u32 },
    /// Record channel audio to a file
    RecordFile {
        filename: String,
        format: String,
        digits: String,
        timeout_secs: Option<u32>,
        beep: bool,
        silence_secs: Option<u32>,
    },
    /// Say a string letter by letter
    SayAlpha { text: String, digits: String },
    /// Say a date (unix timestamp)
    SayDate { time: i64, digits: String },
    /// Say a date and time (unix timestamp) in a given format
    SayDatetime {
        time: i64,
        digits: String,
        format: String,
        timezone: Option<String>,
    },
    /// Say a number digit by digit
    SayDigits { number: i64, digits: String },
    /// Say a number as a whole number
    SayNumber { number: i64, digits: String },
    /// Say a string phonetically
    SayPhonetic { text: String, digits: String },
    /// Say a time (unix timestamp)
    SayTime { time: i64, digits: String },
    /// Send an image to the channel
    SendImage { image: String },
    /// Send text to the channel
    SendText { text: String },
    /// Hang up automatically after a delay (0 disables)
    SetAutohangup { time_secs: u32 },
    /// Set the caller id on the channel
    SetCallerid { callerid: String },
    /// Set the dialplan context to continue in after the AGI returns
    SetContext { context: String },
    /// Set the dialplan extension to continue at after the AGI returns
    SetExtension { extension: String },
    /// Toggle music on hold, optionally selecting a music class
    SetMusic {
        toggle: Toggle,
        music_class: Option<String>,
    },
    /// Set the dialplan priority to continue at after the AGI returns
    SetPriority { priority: String },
    /// Set a channel variable
    SetVariable { name: String, value: String },
    /// Stream an audio file, optionally from an offset
    StreamFile {
        file: String,
        digits: String,
        offset: Option<u32>,
    },
    /// Toggle TDD (telecom device for the deaf) mode
    TddMode { toggle: Toggle },
    /// Log a message to the Asterisk verbose log
    Verbose { message: String, level: u8 },
    /// Wait for one DTMF digit, timeout in milliseconds (`-1` = forever)
    WaitForDigit { timeout_ms: i64 },
}

impl AgiCommand {
    /// Validate all user-supplied fields, then produce the newline-terminated
    /// request line.
    pub fn to_wire_format(&self) -> AgiResult<String> {
        let line = match self {
            AgiCommand::Answer => "ANSWER".to_string(),
            AgiCommand::ChannelStatus { channel } => {
                opt_arg("CHANNEL STATUS", channel.as_deref(), "channel")?
            }
            AgiCommand::ControlStreamFile {
                file,
                digits,
                skip_ms,
                ffchar,
                rewchar,
                pausechar,
            } => {
                validate_no_newlines(file, "file")?;
                let mut line = format!(
                    "CONTROL STREAM FILE {} {} {} {} {}",
                    file,
                    format_digits(digits)?,
                    skip_ms,
                    ffchar,
                    rewchar
                );
                if let Some(p) = pausechar {
                    line.push(' ');
                    line.push(*p);
                }
                line
            }
            AgiCommand::DatabaseDel { family, key } => {
                validate_no_newlines(family, "family")?;
                validate_no_newlines(key, "key")?;
                format!("DATABASE DEL {} {}", family, key)
            }
            AgiCommand::DatabaseDelTree { family, keytree } => {
                validate_no_newlines(family, "family")?;
                opt_arg(
                    &format!("DATABASE DELTREE {}", family),
                    keytree.as_deref(),
                    "keytree",
                )?
            }
            AgiCommand::DatabaseGet { family, key } => {
                validate_no_newlines(family, "family")?;
                validate_no_newlines(key, "key")?;
                format!("DATABASE GET {} {}", family, key)
            }
            AgiCommand::DatabasePut { family, key, value } => {
                validate_no_newlines(family, "family")?;
                validate_no_newlines(key, "key")?;
                validate_no_newlines(value, "value")?;
                format!("DATABASE PUT {} {} {}", family, key, value)
            }
            AgiCommand::Exec { application } => {
                validate_no_newlines(application, "application")?;
                format!("EXEC {}", application)
            }
            AgiCommand::GetData {
                file,
                timeout_secs,
                max_digits,
            } => {
                validate_no_newlines(file, "file")?;
                let mut line = format!("GET DATA {}", file);
                if let Some(t) = timeout_secs {
                    line.push_str(&format!(" {}", u64::from(*t) * 1000));
                    if let Some(max) = max_digits {
                        line.push_str(&format!(" {}", max));
                    }
                }
                line
            }
            AgiCommand::GetFullVariable { name, channel } => {
                validate_no_newlines(name, "variable name")?;
                opt_arg(
                    &format!("GET FULL VARIABLE {}", name),
                    channel.as_deref(),
                    "channel",
                )?
            }
            AgiCommand::GetOption {
                file,
                digits,
                timeout_secs,
            } => {
                validate_no_newlines(file, "file")?;
                format!(
                    "GET OPTION {} {} {}",
                    file,
                    format_digits(digits)?,
                    u64::from(*timeout_secs) * 1000
                )
            }
            AgiCommand::GetVariable { name } => {
                validate_no_newlines(name, "variable name")?;
                format!("GET VARIABLE {}", name)
            }
            AgiCommand::Hangup { channel } => opt_arg("HANGUP", channel.as_deref(), "channel")?,
            AgiCommand::Noop { message } => opt_arg("NOOP", message.as_deref(), "message")?,
            AgiCommand::ReceiveChar { timeout_secs } => {
                format!("RECEIVE CHAR {}", u64::from(*timeout_secs) * 1000)
            }
            AgiCommand::RecordFile {
                filename,
                format,
                digits,
                timeout_secs,
                beep,
                silence_secs,
            } => {
                validate_no_newlines(filename, "filename")?;
                validate_no_newlines(format, "format")?;
                let timeout = match timeout_secs {
                    Some(t) => (i64::from(*t) * 1000).to_string(),
                    None => "-1".to_string(),
                };
                let mut line = format!(
                    "RECORD FILE {} {} {} {}",
                    filename,
                    format,
                    format_digits(digits)?,
                    timeout
                );
                if *beep {
                    line.push_str(" BEEP");
                }
                if let Some(s) = silence_secs {
                    line.push_str(&format!(" s={}", s));
                }
                line
            }
            AgiCommand::SayAlpha { text, digits } => {
                validate_no_newlines(text, "text")?;
                format!("SAY ALPHA '{}' {}", text, format_digits(digits)?)
            }
            AgiCommand::SayDate { time, digits } => {
                format!("SAY DATE {} {}", time, format_digits(digits)?)
            }
            AgiCommand::SayDatetime {
                time,
                digits,
                format,
                timezone,
            } => {
                validate_no_newlines(format, "format")?;
                let mut line =
                    format!("SAY DATETIME {} {} {}", time, format_digits(digits)?, format);
                if let Some(tz) = timezone {
                    validate_no_newlines(tz, "timezone")?;
                    line.push(' ');
                    line.push_str(tz);
                }
                line
            }
            AgiCommand::SayDigits { number, digits } => {
                format!("SAY DIGITS {} {}", number, format_digits(digits)?)
            }
            AgiCommand::SayNumber { number, digits } => {
                format!("SAY NUMBER {} {}", number, format_digits(digits)?)
            }
            AgiCommand::SayPhonetic { text, digits } => {
                validate_no_newlines(text, "text")?;
                format!("SAY PHONETIC '{}' {}", text, format_digits(digits)?)
            }
            AgiCommand::SayTime { time, digits } => {
                format!("SAY TIME {} {}", time, format_digits(digits)?)
            }
            AgiCommand::SendImage { image } => {
                validate_no_newlines(image, "image")?;
                format!("SEND IMAGE {}", image)
            }
            AgiCommand::SendText { text } => {
                validate_no_newlines(text, "text")?;
                format!("SEND TEXT '{}'", text)
            }
            AgiCommand::SetAutohangup { time_secs } => {
                format!("SET AUTOHANGUP {}", time_secs)
            }
            AgiCommand::SetCallerid { callerid } => {
                validate_no_newlines(callerid, "callerid")?;
                format!("SET CALLERID {}", callerid)
            }
            AgiCommand::SetContext { context } => {
                validate_no_newlines(context, "context")?;
                format!("SET CONTEXT {}", context)
            }
            AgiCommand::SetExtension { extension } => {
                validate_no_newlines(extension, "extension")?;
                format!("SET EXTENSION {}", extension)
            }
            AgiCommand::SetMusic {
                toggle,
                music_class,
            } => opt_arg(
                &format!("SET MUSIC {}", toggle),
                music_class.as_deref(),
                "music class",
            )?,
            AgiCommand::SetPriority { priority } => {
                validate_no_newlines(priority, "priority")?;
                format!("SET PRIORITY {}", priority)
            }
            AgiCommand::SetVariable { name, value } => {
                validate_no_newlines(name, "variable name")?;
                validate_no_newlines(value, "variable value")?;
                format!("SET VARIABLE {} {}", name, value)
            }
            AgiCommand::StreamFile {
                file,
                digits,
                offset,
            } => {
                validate_no_newlines(file, "file")?;
                let mut line = format!("STREAM FILE {} {}", file, format_digits(digits)?);
                if let Some(o) = offset {
                    line.push_str(&format!(" {}", o));
                }
                line
            }
            AgiCommand::TddMode { toggle } => format!("TDD MODE {}", toggle),
            AgiCommand::Verbose { message, level } => {
                validate_no_newlines(message, "message")?;
                format!("VERBOSE \"{}\" {}", message, level)
            }
            AgiCommand::WaitForDigit { timeout_ms } => {
                format!("WAIT FOR DIGIT {}", timeout_ms)
            }
        };

        Ok(format!("{}{}", line, LINE_TERMINATOR))
    }

    /// Request line without the terminator, for logging and error context.
    pub(crate) fn display_line(&self) -> String {
        self.to_wire_format()
            .map(|w| w.trim_end().to_string())
            .unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// `"{base}"` or `"{base} {arg}"`, validating the optional argument.
fn opt_arg(base: &str, arg: Option<&str>, context: &str) -> AgiResult<String> {
    match arg {
        Some(a) => {
            validate_no_newlines(a, context)?;
            Ok(format!("{} {}", base, a))
        }
        None => Ok(base.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_commands() {
        assert_eq!(AgiCommand::Answer.to_wire_format().unwrap(), "ANSWER\n");
        assert_eq!(
            AgiCommand::Hangup { channel: None }.to_wire_format().unwrap(),
            "HANGUP\n"
        );
        assert_eq!(
            AgiCommand::Hangup {
                channel: Some("SIP/1234-abcd".to_string())
            }
            .to_wire_format()
            .unwrap(),
            "HANGUP SIP/1234-abcd\n"
        );
        assert_eq!(
            AgiCommand::ChannelStatus { channel: None }
                .to_wire_format()
                .unwrap(),
            "CHANNEL STATUS\n"
        );
    }

    #[test]
    fn database_commands() {
        assert_eq!(
            AgiCommand::DatabaseGet {
                family: "users".to_string(),
                key: "1000".to_string()
            }
            .to_wire_format()
            .unwrap(),
            "DATABASE GET users 1000\n"
        );
        assert_eq!(
            AgiCommand::DatabasePut {
                family: "users".to_string(),
                key: "1000".to_string(),
                value: "alice".to_string()
            }
            .to_wire_format()
            .unwrap(),
            "DATABASE PUT users 1000 alice\n"
        );
        assert_eq!(
            AgiCommand::DatabaseDelTree {
                family: "users".to_string(),
                keytree: None
            }
            .to_wire_format()
            .unwrap(),
            "DATABASE DELTREE users\n"
        );
    }

    #[test]
    fn seconds_converted_to_milliseconds() {
        assert_eq!(
            AgiCommand::GetData {
                file: "enter-pin".to_string(),
                timeout_secs: Some(5),
                max_digits: Some(4)
            }
            .to_wire_format()
            .unwrap(),
            "GET DATA enter-pin 5000 4\n"
        );
        assert_eq!(
            AgiCommand::GetOption {
                file: "menu".to_string(),
                digits: "12".to_string(),
                timeout_secs: 3
            }
            .to_wire_format()
            .unwrap(),
            "GET OPTION menu \"12\" 3000\n"
        );
        assert_eq!(
            AgiCommand::ReceiveChar { timeout_secs: 2 }
                .to_wire_format()
                .unwrap(),
            "RECEIVE CHAR 2000\n"
        );
    }

    #[test]
    fn wait_for_digit_takes_milliseconds() {
        assert_eq!(
            AgiCommand::WaitForDigit { timeout_ms: -1 }
                .to_wire_format()
                .unwrap(),
            "WAIT FOR DIGIT -1\n"
        );
        assert_eq!(
            AgiCommand::WaitForDigit { timeout_ms: 2500 }
                .to_wire_format()
                .unwrap(),
            "WAIT FOR DIGIT 2500\n"
        );
    }

    #[test]
    fn record_file_options() {
        assert_eq!(
            AgiCommand::RecordFile {
                filename: "/tmp/msg".to_string(),
                format: "wav".to_string(),
                digits: "#".to_string(),
                timeout_secs: None,
                beep: false,
                silence_secs: None
            }
            .to_wire_format()
            .unwrap(),
            "RECORD FILE /tmp/msg wav \"#\" -1\n"
        );
        assert_eq!(
            AgiCommand::RecordFile {
                filename: "/tmp/msg".to_string(),
                format: "wav".to_string(),
                digits: "#".to_string(),
                timeout_secs: Some(30),
                beep: true,
                silence_secs: Some(2)
            }
            .to_wire_format()
            .unwrap(),
            "RECORD FILE /tmp/msg wav \"#\" 30000 BEEP s=2\n"
        );
    }

    #[test]
    fn say_commands() {
        assert_eq!(
            AgiCommand::SayDigits {
                number: 123,
                digits: String::new()
            }
            .to_wire_format()
            .unwrap(),
            "SAY DIGITS 123 \"\"\n"
        );
        assert_eq!(
            AgiCommand::SayAlpha {
                text: "abc".to_string(),
                digits: "1".to_string()
            }
            .to_wire_format()
            .unwrap(),
            "SAY ALPHA 'abc' \"1\"\n"
        );
        assert_eq!(
            AgiCommand::SayDatetime {
                time: 1_000_000_000,
                digits: String::new(),
                format: "ABdY".to_string(),
                timezone: Some("UTC".to_string())
            }
            .to_wire_format()
            .unwrap(),
            "SAY DATETIME 1000000000 \"\" ABdY UTC\n"
        );
    }

    #[test]
    fn control_stream_file_interpolates_arguments() {
        assert_eq!(
            AgiCommand::ControlStreamFile {
                file: "podcast".to_string(),
                digits: String::new(),
                skip_ms: 3000,
                ffchar: '*',
                rewchar: '#',
                pausechar: None
            }
            .to_wire_format()
            .unwrap(),
            "CONTROL STREAM FILE podcast \"\" 3000 * #\n"
        );
        assert_eq!(
            AgiCommand::ControlStreamFile {
                file: "podcast".to_string(),
                digits: "1".to_string(),
                skip_ms: 3000,
                ffchar: '*',
                rewchar: '#',
                pausechar: Some('0')
            }
            .to_wire_format()
            .unwrap(),
            "CONTROL STREAM FILE podcast \"1\" 3000 * # 0\n"
        );
    }

    #[test]
    fn toggle_wire_format() {
        assert_eq!(
            AgiCommand::SetMusic {
                toggle: Toggle::On,
                music_class: None
            }
            .to_wire_format()
            .unwrap(),
            "SET MUSIC on\n"
        );
        assert_eq!(
            AgiCommand::TddMode {
                toggle: Toggle::Off
            }
            .to_wire_format()
            .unwrap(),
            "TDD MODE off\n"
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let cmd = || AgiCommand::StreamFile {
            file: "welcome".to_string(),
            digits: "'125'".to_string(),
            offset: Some(120),
        };
        let first = cmd().to_wire_format().unwrap();
        let second = cmd().to_wire_format().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "STREAM FILE welcome \"125\" 120\n");
    }

    #[test]
    fn newline_injection_rejected() {
        let cmd = AgiCommand::SetVariable {
            name: "X".to_string(),
            value: "y\nHANGUP".to_string(),
        };
        assert!(matches!(
            cmd.to_wire_format(),
            Err(AgiError::InvalidArgument(_))
        ));

        let cmd = AgiCommand::Exec {
            application: "Dial\r\nHANGUP".to_string(),
        };
        assert!(cmd.to_wire_format().is_err());
    }

    #[test]
    fn invalid_escape_digits_rejected() {
        let cmd = AgiCommand::StreamFile {
            file: "welcome".to_string(),
            digits: "1x".to_string(),
            offset: None,
        };
        assert!(matches!(
            cmd.to_wire_format(),
            Err(AgiError::InvalidArgument(_))
        ));
    }
}
