//! AGI session: channel initialization and command execution
//!
//! An [`AgiSession`] exclusively owns one transport (a TCP stream in FastAGI
//! mode, or any other `AsyncRead + AsyncWrite` byte stream) and drives the
//! half-duplex AGI exchange over it: read the initialization block Asterisk
//! sends when it connects, then alternate one request line against one
//! response line, never pipelined.

use crate::{
    channel::ChannelStatus,
    command::{AgiCommand, Toggle},
    constants::MAX_LINE_LENGTH,
    error::{AgiError, AgiResult},
    protocol::{decode_response_line, AgiValue, DecodedResult},
    response::AgiResponse,
};
use std::collections::HashMap;
use tokio::io::{
    split, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    ReadHalf, WriteHalf,
};
use tracing::{debug, warn};

/// Default sound directory holding per-digit audio files (`digits/1`, …).
const DIGITS_AUDIO_PATH: &str = "digits";

/// Lifecycle state of an AGI session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, initialization block not yet consumed
    Uninitialized,
    /// Initialized; commands may be executed
    Ready,
    /// Closed; no further commands are permitted
    Terminated,
}

/// One AGI conversation with Asterisk over an exclusively owned transport.
///
/// ```rust,no_run
/// use asterisk_agi_tokio::{AgiError, AgiSession};
/// use tokio::net::TcpStream;
///
/// async fn handle(stream: TcpStream) -> Result<(), AgiError> {
///     let mut session = AgiSession::new(stream);
///     session.initialize().await?;
///     session.answer().await?;
///     let digit = session.wait_for_digit(5000).await?;
///     if let Some(d) = digit.data_char() {
///         session.say_digits(i64::from(d.to_digit(10).unwrap_or(0)), "").await?;
///     }
///     session.hangup(None).await?;
///     Ok(())
/// }
/// ```
pub struct AgiSession<T> {
    reader: BufReader<ReadHalf<T>>,
    writer: WriteHalf<T>,
    channel_params: HashMap<String, String>,
    last_response: Option<String>,
    state: SessionState,
}

impl<T> std::fmt::Debug for AgiSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgiSession")
            .field("state", &self.state)
            .field("channel_params", &self.channel_params.len())
            .finish()
    }
}

impl<T: AsyncRead + AsyncWrite> AgiSession<T> {
    /// Take ownership of a transport and create an uninitialized session.
    pub fn new(transport: T) -> Self {
        let (read_half, write_half) = split(transport);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            channel_params: HashMap::new(),
            last_response: None,
            state: SessionState::Uninitialized,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Channel parameters populated by [`initialize()`](Self::initialize),
    /// keyed without their `agi_` prefix (`language`, `context`, `request`…).
    pub fn channel_params(&self) -> &HashMap<String, String> {
        &self.channel_params
    }

    /// Look up one channel parameter by its unprefixed key.
    pub fn channel_param(&self, key: impl AsRef<str>) -> Option<&str> {
        self.channel_params.get(key.as_ref()).map(|s| s.as_str())
    }

    /// Raw text of the last response line received, for payload inspection.
    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }

    /// Consume the initialization block Asterisk sends on connect.
    ///
    /// Reads `agi_<key>: <value>` lines into the channel parameter map until
    /// the terminating blank line. A duplicate key overwrites the earlier
    /// value with a diagnostic. Must complete before any other command;
    /// calling it on an already-initialized session fails with
    /// [`AgiError::AlreadyInitialized`] — use
    /// [`reinitialize()`](Self::reinitialize) when a reset is intended.
    pub async fn initialize(&mut self) -> AgiResult<()> {
        if self.state != SessionState::Uninitialized {
            return Err(AgiError::AlreadyInitialized);
        }
        loop {
            let line = self.read_line().await?.ok_or_else(|| {
                AgiError::Hangup("channel hung up during initialization".to_string())
            })?;
            if line.trim().is_empty() {
                break;
            }
            let Some((key, value)) = parse_channel_param(&line) else {
                continue;
            };
            if let Some(old) = self
                .channel_params
                .insert(key.to_string(), value.to_string())
            {
                warn!(
                    "duplicate channel parameter {} (was {:?}, reset to {:?})",
                    key, old, value
                );
            } else {
                debug!("channel parameter {} = {}", key, value);
            }
        }
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Clear all session state and run initialization again.
    ///
    /// The peer must supply a fresh initialization block; previously stored
    /// channel parameters are discarded, not merged. A `Terminated` session
    /// stays terminated and cannot be reset.
    pub async fn reinitialize(&mut self) -> AgiResult<()> {
        if self.state == SessionState::Terminated {
            return Err(AgiError::NotReady(SessionState::Terminated));
        }
        self.state = SessionState::Uninitialized;
        self.channel_params.clear();
        self.last_response = None;
        self.initialize().await
    }

    /// Execute one command: write the request line, read exactly one
    /// response line, decode it.
    ///
    /// This is the single synchronization point of the session — every
    /// wrapper below goes through it. The raw response line is recorded for
    /// [`last_response()`](Self::last_response) before decoding.
    pub async fn execute(&mut self, command: &AgiCommand) -> AgiResult<DecodedResult> {
        if self.state != SessionState::Ready {
            return Err(AgiError::NotReady(self.state));
        }
        let wire = command.to_wire_format()?;
        debug!("sent to Asterisk: {}", wire.trim_end());
        self.writer.write_all(wire.as_bytes()).await?;
        self.writer.flush().await?;

        let line = self.read_line().await?.ok_or_else(|| {
            let err = AgiError::Hangup("channel hung up during command execution".to_string());
            warn!("{} in command ({})", err, wire.trim_end());
            err
        })?;
        debug!("received from Asterisk: {}", line);
        self.last_response = Some(line.clone());

        decode_response_line(&line).map_err(|err| {
            warn!("{} in command ({})", err, wire.trim_end());
            err
        })
    }

    /// Shut down the transport. The session is `Terminated` afterwards and
    /// rejects further commands.
    pub async fn close(&mut self) {
        self.state = SessionState::Terminated;
        if let Err(err) = self.writer.shutdown().await {
            debug!("transport shutdown: {}", err);
        }
    }

    /// Read one line, buffering at most `MAX_LINE_LENGTH` bytes. A line that
    /// hits the cap without a terminator is rejected before it can grow.
    async fn read_line(&mut self) -> AgiResult<Option<String>> {
        let mut buf = String::new();
        let n = (&mut self.reader)
            .take(MAX_LINE_LENGTH as u64)
            .read_line(&mut buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if !buf.ends_with('\n') && buf.len() >= MAX_LINE_LENGTH {
            return Err(AgiError::command(
                "line exceeds maximum length",
                buf.chars().take(128).collect::<String>(),
            ));
        }
        Ok(Some(buf.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Execute and apply the universal channel-failure rule: a native result
    /// of `-1` means the underlying channel failed.
    async fn run(&mut self, command: &AgiCommand) -> AgiResult<DecodedResult> {
        let decoded = self.execute(command).await?;
        if decoded.native.is_int(-1) {
            return Err(AgiError::Channel {
                command: command.display_line(),
                raw: self.last_response.clone().unwrap_or_default(),
            });
        }
        Ok(decoded)
    }

    fn native_char(&self, n: i64) -> AgiResult<AgiValue> {
        u32::try_from(n)
            .ok()
            .and_then(char::from_u32)
            .map(|c| AgiValue::Str(c.to_string()))
            .ok_or_else(|| {
                AgiError::command(
                    "result is not a character code",
                    self.last_response.clone().unwrap_or_default(),
                )
            })
    }

    /// Mapping shared by the DTMF-interruptible playback/announce commands:
    /// `0` is success with no digit, a positive result is the character code
    /// of the digit pressed.
    fn dtmf_response(&self, decoded: DecodedResult) -> AgiResult<AgiResponse> {
        let mut response = AgiResponse::new(decoded.native.clone());
        response.success = true;
        match decoded.native {
            AgiValue::Int(0) => {}
            AgiValue::Int(n) => response.data = Some(self.native_char(n)?),
            AgiValue::Str(s) => response.data = Some(AgiValue::Str(s)),
        }
        Ok(response)
    }

    /// Mapping for commands where `0` is the only success result.
    fn zero_success(&self, decoded: DecodedResult) -> AgiResponse {
        let mut response = AgiResponse::new(decoded.native.clone());
        response.success = decoded.native.is_int(0);
        response
    }

    /// Mapping for commands where `1` is the only success result.
    fn one_success(&self, decoded: DecodedResult) -> AgiResponse {
        let mut response = AgiResponse::new(decoded.native.clone());
        response.success = decoded.native.is_int(1);
        response
    }

    /// Mapping for the variable/database reads: `1` means found, with the
    /// value in the trailing parenthetical; `0` means not set.
    fn lookup_response(&self, decoded: DecodedResult) -> AgiResponse {
        let mut response = AgiResponse::new(decoded.native.clone());
        if decoded.native.is_int(1) {
            response.success = true;
            response.data = decoded.payload.map(AgiValue::Str);
        }
        response
    }

    // --- command wrappers -------------------------------------------------

    /// Answer the channel. Success on `0`.
    pub async fn answer(&mut self) -> AgiResult<AgiResponse> {
        let decoded = self.run(&AgiCommand::Answer).await?;
        Ok(self.zero_success(decoded))
    }

    /// Hang up the given channel, or the current one. Success on `1`.
    pub async fn hangup(&mut self, channel: Option<&str>) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::Hangup {
            channel: channel.map(str::to_string),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.one_success(decoded))
    }

    /// Query the status of the given channel, or the current one.
    ///
    /// Succeeds for any non-negative result; `data` carries the descriptive
    /// status string (see [`ChannelStatus`]).
    pub async fn channel_status(&mut self, channel: Option<&str>) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::ChannelStatus {
            channel: channel.map(str::to_string),
        };
        let decoded = self.run(&cmd).await?;
        let mut response = AgiResponse::new(decoded.native.clone());
        response.success = true;
        if let Some(status) = decoded.native.as_int().and_then(ChannelStatus::from_number) {
            response.data = Some(AgiValue::Str(status.as_str().to_string()));
        }
        Ok(response)
    }

    /// Stream an audio file, interruptible by any of the escape digits.
    /// `data` carries the pressed digit when playback was interrupted.
    pub async fn stream_file(
        &mut self,
        file: &str,
        digits: &str,
        offset: Option<u32>,
    ) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::StreamFile {
            file: file.to_string(),
            digits: digits.to_string(),
            offset,
        };
        let decoded = self.run(&cmd).await?;
        self.dtmf_response(decoded)
    }

    /// Stream audio with caller-controlled fast-forward, rewind, and pause.
    pub async fn control_stream_file(
        &mut self,
        file: &str,
        digits: &str,
        skip_ms: u32,
        ffchar: char,
        rewchar: char,
        pausechar: Option<char>,
    ) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::ControlStreamFile {
            file: file.to_string(),
            digits: digits.to_string(),
            skip_ms,
            ffchar,
            rewchar,
            pausechar,
        };
        let decoded = self.run(&cmd).await?;
        self.dtmf_response(decoded)
    }

    /// Stream several audio files back to back, interruptible by the escape
    /// digits.
    ///
    /// Stops and returns immediately if any segment fails or already carries
    /// an early DTMF press; the returned response is the last per-file
    /// result. Requires at least one file.
    pub async fn background<S: AsRef<str>>(
        &mut self,
        files: &[S],
        digits: &str,
    ) -> AgiResult<AgiResponse> {
        let (first, rest) = files.split_first().ok_or_else(|| {
            AgiError::InvalidArgument("background requires at least one audio file".to_string())
        })?;
        let mut last = self.stream_file(first.as_ref(), digits, None).await?;
        for file in rest {
            if !last.success || last.data.is_some() {
                break;
            }
            last = self.stream_file(file.as_ref(), digits, None).await?;
        }
        Ok(last)
    }

    /// Say a digit string by streaming one digit-audio file per character
    /// from the default `digits` sound directory.
    pub async fn background_digits(&mut self, value: &str, digits: &str) -> AgiResult<AgiResponse> {
        self.background_digits_from(value, digits, DIGITS_AUDIO_PATH)
            .await
    }

    /// Like [`background_digits`](Self::background_digits), with an explicit
    /// digit-audio directory.
    pub async fn background_digits_from(
        &mut self,
        value: &str,
        digits: &str,
        path: &str,
    ) -> AgiResult<AgiResponse> {
        let audio: Vec<String> = value.chars().map(|c| format!("{}/{}", path, c)).collect();
        self.background(&audio, digits).await
    }

    /// Delete one database key. Success on `1`.
    pub async fn database_del(&mut self, family: &str, key: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::DatabaseDel {
            family: family.to_string(),
            key: key.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.one_success(decoded))
    }

    /// Delete a database family or keytree. Success on `1`.
    pub async fn database_deltree(
        &mut self,
        family: &str,
        keytree: Option<&str>,
    ) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::DatabaseDelTree {
            family: family.to_string(),
            keytree: keytree.map(str::to_string),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.one_success(decoded))
    }

    /// Read one database value. Success on `1` with the value as `data`;
    /// `0` means the key is not set.
    pub async fn database_get(&mut self, family: &str, key: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::DatabaseGet {
            family: family.to_string(),
            key: key.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.lookup_response(decoded))
    }

    /// Write one database value. Success on `1`.
    pub async fn database_put(
        &mut self,
        family: &str,
        key: &str,
        value: &str,
    ) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::DatabasePut {
            family: family.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.one_success(decoded))
    }

    /// Execute a dialplan application.
    ///
    /// Success reflects the `EXEC` command itself, not the application. A
    /// native result of `-2` means the application was not found. `data` is
    /// the parenthesized application output when Asterisk provides one, the
    /// native result otherwise.
    pub async fn exec(&mut self, application: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::Exec {
            application: application.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        if decoded.native.is_int(-2) {
            return Err(AgiError::command(
                format!("application not found in ({})", cmd.display_line()),
                self.last_response.clone().unwrap_or_default(),
            ));
        }
        let mut response = AgiResponse::new(decoded.native.clone());
        response.success = true;
        response.data = Some(match decoded.payload {
            Some(p) => AgiValue::Str(p),
            None => decoded.native,
        });
        Ok(response)
    }

    /// Play a prompt and collect DTMF digits until timeout or the maximum
    /// digit count.
    ///
    /// `data` is the native result unchanged: a digit string the caller
    /// entered may carry a significant leading zero and stays
    /// [`AgiValue::Str`].
    pub async fn get_data(
        &mut self,
        file: &str,
        timeout_secs: Option<u32>,
        max_digits: Option<u32>,
    ) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::GetData {
            file: file.to_string(),
            timeout_secs,
            max_digits,
        };
        let decoded = self.run(&cmd).await?;
        let mut response = AgiResponse::new(decoded.native.clone());
        response.success = true;
        response.data = Some(decoded.native);
        Ok(response)
    }

    /// Read a channel variable with full expression evaluation.
    pub async fn get_full_variable(
        &mut self,
        name: &str,
        channel: Option<&str>,
    ) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::GetFullVariable {
            name: name.to_string(),
            channel: channel.map(str::to_string),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.lookup_response(decoded))
    }

    /// Stream audio, then wait up to the timeout for one escape digit.
    pub async fn get_option(
        &mut self,
        file: &str,
        digits: &str,
        timeout_secs: u32,
    ) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::GetOption {
            file: file.to_string(),
            digits: digits.to_string(),
            timeout_secs,
        };
        let decoded = self.run(&cmd).await?;
        self.dtmf_response(decoded)
    }

    /// Read a channel variable. Success on `1` with the value as `data`;
    /// `0` means the variable is not set.
    pub async fn get_variable(&mut self, name: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::GetVariable {
            name: name.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.lookup_response(decoded))
    }

    /// Do nothing, successfully.
    pub async fn noop(&mut self, message: Option<&str>) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::Noop {
            message: message.map(str::to_string),
        };
        let decoded = self.run(&cmd).await?;
        let mut response = AgiResponse::new(decoded.native);
        response.success = true;
        Ok(response)
    }

    /// Receive one text character from the channel. A result of `0` means
    /// the channel does not support text.
    pub async fn receive_char(&mut self, timeout_secs: u32) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::ReceiveChar { timeout_secs };
        let decoded = self.run(&cmd).await?;
        if decoded.native.is_int(0) {
            return Err(AgiError::command(
                format!("channel does not support TEXT in ({})", cmd.display_line()),
                self.last_response.clone().unwrap_or_default(),
            ));
        }
        self.dtmf_response(decoded)
    }

    /// Record channel audio to a file until an escape digit, the timeout,
    /// or the silence threshold. `data` carries the interrupting digit when
    /// one was pressed.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_file(
        &mut self,
        filename: &str,
        format: &str,
        digits: &str,
        timeout_secs: Option<u32>,
        beep: bool,
        silence_secs: Option<u32>,
    ) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::RecordFile {
            filename: filename.to_string(),
            format: format.to_string(),
            digits: digits.to_string(),
            timeout_secs,
            beep,
            silence_secs,
        };
        let decoded = self.run(&cmd).await?;
        self.dtmf_response(decoded)
    }

    /// Say a string letter by letter.
    pub async fn say_alpha(&mut self, text: &str, digits: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SayAlpha {
            text: text.to_string(),
            digits: digits.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        self.dtmf_response(decoded)
    }

    /// Say a date given as a unix timestamp.
    pub async fn say_date(&mut self, time: i64, digits: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SayDate {
            time,
            digits: digits.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        self.dtmf_response(decoded)
    }

    /// Say a date and time given as a unix timestamp, in the given format
    /// (e.g. `ABdY`), optionally in a specific timezone.
    pub async fn say_datetime(
        &mut self,
        time: i64,
        digits: &str,
        format: &str,
        timezone: Option<&str>,
    ) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SayDatetime {
            time,
            digits: digits.to_string(),
            format: format.to_string(),
            timezone: timezone.map(str::to_string),
        };
        let decoded = self.run(&cmd).await?;
        self.dtmf_response(decoded)
    }

    /// Say a number digit by digit.
    pub async fn say_digits(&mut self, number: i64, digits: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SayDigits {
            number,
            digits: digits.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        self.dtmf_response(decoded)
    }

    /// Say a number as a whole number.
    pub async fn say_number(&mut self, number: i64, digits: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SayNumber {
            number,
            digits: digits.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        self.dtmf_response(decoded)
    }

    /// Say a string phonetically.
    pub async fn say_phonetic(&mut self, text: &str, digits: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SayPhonetic {
            text: text.to_string(),
            digits: digits.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        self.dtmf_response(decoded)
    }

    /// Say a time given as a unix timestamp.
    pub async fn say_time(&mut self, time: i64, digits: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SayTime {
            time,
            digits: digits.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        self.dtmf_response(decoded)
    }

    /// Send an image to the channel.
    ///
    /// Asterisk returns the same result whether the image was sent or the
    /// channel does not support images; success reflects both cases.
    pub async fn send_image(&mut self, image: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SendImage {
            image: image.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.zero_success(decoded))
    }

    /// Send text to the channel. Same success ambiguity as
    /// [`send_image`](Self::send_image).
    pub async fn send_text(&mut self, text: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SendText {
            text: text.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.zero_success(decoded))
    }

    /// Hang up the channel automatically after `time_secs` (0 disables).
    pub async fn set_autohangup(&mut self, time_secs: u32) -> AgiResult<AgiResponse> {
        let decoded = self.run(&AgiCommand::SetAutohangup { time_secs }).await?;
        Ok(self.zero_success(decoded))
    }

    /// Set the caller id on the channel. Success on `1`.
    pub async fn set_callerid(&mut self, callerid: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SetCallerid {
            callerid: callerid.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.one_success(decoded))
    }

    /// Set the dialplan context to continue in after the AGI returns.
    pub async fn set_context(&mut self, context: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SetContext {
            context: context.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.zero_success(decoded))
    }

    /// Set the dialplan extension to continue at after the AGI returns.
    pub async fn set_extension(&mut self, extension: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SetExtension {
            extension: extension.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.zero_success(decoded))
    }

    /// Toggle music on hold, optionally selecting a music class.
    pub async fn set_music(
        &mut self,
        toggle: Toggle,
        music_class: Option<&str>,
    ) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SetMusic {
            toggle,
            music_class: music_class.map(str::to_string),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.zero_success(decoded))
    }

    /// Set the dialplan priority to continue at after the AGI returns.
    pub async fn set_priority(&mut self, priority: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SetPriority {
            priority: priority.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.zero_success(decoded))
    }

    /// Set a channel variable. Success on `1`.
    pub async fn set_variable(&mut self, name: &str, value: &str) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::SetVariable {
            name: name.to_string(),
            value: value.to_string(),
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.one_success(decoded))
    }

    /// Toggle TDD mode. A result of `0` means the channel is not
    /// TDD-capable, reported as a channel error.
    pub async fn tdd_mode(&mut self, toggle: Toggle) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::TddMode { toggle };
        let decoded = self.run(&cmd).await?;
        if decoded.native.is_int(0) {
            return Err(AgiError::Channel {
                command: cmd.display_line(),
                raw: self.last_response.clone().unwrap_or_default(),
            });
        }
        Ok(self.one_success(decoded))
    }

    /// Log a message to the Asterisk verbose log at the given level.
    pub async fn verbose(&mut self, message: &str, level: u8) -> AgiResult<AgiResponse> {
        let cmd = AgiCommand::Verbose {
            message: message.to_string(),
            level,
        };
        let decoded = self.run(&cmd).await?;
        Ok(self.one_success(decoded))
    }

    /// Wait up to `timeout_ms` milliseconds (`-1` = forever) for one DTMF
    /// digit. A result of `0` means the wait elapsed with no digit; a
    /// positive result is the digit's character code, decoded into `data`.
    pub async fn wait_for_digit(&mut self, timeout_ms: i64) -> AgiResult<AgiResponse> {
        let decoded = self.run(&AgiCommand::WaitForDigit { timeout_ms }).await?;
        self.dtmf_response(decoded)
    }
}

/// Parse one `agi_<key>: <value>` initialization line, returning the key
/// without its prefix. Lines in any other shape are ignored by the caller.
fn parse_channel_param(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("agi_")?;
    let colon = rest.find(':')?;
    let key = &rest[..colon];
    let value = rest[colon + 1..].trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    const INIT_BLOCK: &str = "agi_channel: SIP/test-0001\nagi_language: en\n\n";

    /// Session over an in-memory transport with the peer side scripted.
    async fn scripted(script: &str) -> (AgiSession<DuplexStream>, DuplexStream) {
        let (near, mut far) = tokio::io::duplex(64 * 1024);
        far.write_all(script.as_bytes()).await.unwrap();
        (AgiSession::new(near), far)
    }

    /// Initialized session followed by the given scripted response lines.
    async fn ready(script: &str) -> (AgiSession<DuplexStream>, DuplexStream) {
        let (mut session, far) = scripted(&format!("{}{}", INIT_BLOCK, script)).await;
        session.initialize().await.unwrap();
        (session, far)
    }

    /// Everything the session wrote to the peer, read after close.
    async fn sent_lines(mut session: AgiSession<DuplexStream>, mut far: DuplexStream) -> String {
        session.close().await;
        drop(session);
        let mut sent = String::new();
        far.read_to_string(&mut sent).await.unwrap();
        sent
    }

    #[tokio::test]
    async fn initialize_populates_channel_params() {
        let (mut session, _far) =
            scripted("agi_language: en\nagi_context: demo\n\n").await;
        session.initialize().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.channel_param("language"), Some("en"));
        assert_eq!(session.channel_param("context"), Some("demo"));
        assert_eq!(session.channel_params().len(), 2);
    }

    #[tokio::test]
    async fn initialize_ignores_unrecognized_lines() {
        let (mut session, _far) =
            scripted("agi_request: agi://localhost\nnot a parameter\n\n").await;
        session.initialize().await.unwrap();
        assert_eq!(session.channel_param("request"), Some("agi://localhost"));
        assert_eq!(session.channel_params().len(), 1);
    }

    #[tokio::test]
    async fn initialize_overwrites_duplicate_keys() {
        let (mut session, _far) =
            scripted("agi_language: en\nagi_language: fr\n\n").await;
        session.initialize().await.unwrap();
        assert_eq!(session.channel_param("language"), Some("fr"));
    }

    #[tokio::test]
    async fn double_initialize_is_an_error() {
        let (mut session, _far) = scripted(INIT_BLOCK).await;
        session.initialize().await.unwrap();
        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, AgiError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn reinitialize_replaces_parameters() {
        let script = "agi_language: en\nagi_context: demo\n\nagi_language: fr\n\n";
        let (mut session, _far) = scripted(script).await;
        session.initialize().await.unwrap();
        session.reinitialize().await.unwrap();
        // fully replaced, never merged
        assert_eq!(session.channel_param("language"), Some("fr"));
        assert_eq!(session.channel_param("context"), None);
        assert_eq!(session.channel_params().len(), 1);
    }

    #[tokio::test]
    async fn eof_during_initialize_is_hangup() {
        let (mut session, mut far) = scripted("agi_language: en\n").await;
        far.shutdown().await.unwrap();
        let err = session.initialize().await.unwrap_err();
        assert!(err.is_hangup());
    }

    #[tokio::test]
    async fn execute_before_initialize_is_rejected() {
        let (mut session, _far) = scripted("").await;
        let err = session.answer().await.unwrap_err();
        assert!(matches!(
            err,
            AgiError::NotReady(SessionState::Uninitialized)
        ));
    }

    #[tokio::test]
    async fn execute_after_close_is_rejected() {
        let (mut session, _far) = ready("").await;
        session.close().await;
        let err = session.answer().await.unwrap_err();
        assert!(matches!(err, AgiError::NotReady(SessionState::Terminated)));
    }

    #[tokio::test]
    async fn reinitialize_after_close_is_rejected() {
        // a terminated session must stay terminated, even with a fresh
        // init block waiting on the wire
        let (mut session, _far) = ready("agi_language: fr\n\n").await;
        session.close().await;
        let err = session.reinitialize().await.unwrap_err();
        assert!(matches!(err, AgiError::NotReady(SessionState::Terminated)));
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn oversized_line_is_rejected() {
        let (near, mut far) = tokio::io::duplex(2 * MAX_LINE_LENGTH);
        let mut session = AgiSession::new(near);
        let endless = "x".repeat(MAX_LINE_LENGTH + 1);
        far.write_all(endless.as_bytes()).await.unwrap();
        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, AgiError::Command { .. }));
    }

    #[tokio::test]
    async fn eof_during_command_is_hangup() {
        let (mut session, mut far) = ready("").await;
        far.shutdown().await.unwrap();
        let err = session.answer().await.unwrap_err();
        assert!(err.is_hangup());
    }

    #[tokio::test]
    async fn sequential_hangup_results() {
        // success=false, success=true, then a channel failure
        let (mut session, _far) =
            ready("200 result=0\n200 result=1\n200 result=-1\n").await;

        let first = session.hangup(None).await.unwrap();
        assert!(!first.success);

        let second = session.hangup(None).await.unwrap();
        assert!(second.success);

        let err = session.hangup(None).await.unwrap_err();
        assert!(matches!(err, AgiError::Channel { .. }));
        assert_eq!(err.raw_data(), Some("200 result=-1"));
    }

    #[tokio::test]
    async fn answer_succeeds_on_zero() {
        let (mut session, _far) = ready("200 result=0\n").await;
        let response = session.answer().await.unwrap();
        assert!(response.success);
        assert_eq!(response.native, AgiValue::Int(0));
    }

    #[tokio::test]
    async fn timeout_marker_raises_timeout() {
        let (mut session, _far) = ready("200 result= (timeout)\n").await;
        let err = session.wait_for_digit(1000).await.unwrap_err();
        assert!(matches!(err, AgiError::Timeout { .. }));
    }

    #[tokio::test]
    async fn malformed_response_raises_command_error() {
        let (mut session, _far) = ready("510 Invalid or unknown command\n").await;
        let err = session.answer().await.unwrap_err();
        assert!(matches!(err, AgiError::Command { .. }));
        assert_eq!(
            session.last_response(),
            Some("510 Invalid or unknown command")
        );
    }

    #[tokio::test]
    async fn wait_for_digit_decodes_character_code() {
        // 53 is '5'
        let (mut session, _far) = ready("200 result=53\n").await;
        let response = session.wait_for_digit(-1).await.unwrap();
        assert!(response.success);
        assert_eq!(response.data_char(), Some('5'));
    }

    #[tokio::test]
    async fn wait_for_digit_zero_means_no_digit() {
        let (mut session, _far) = ready("200 result=0\n").await;
        let response = session.wait_for_digit(1000).await.unwrap();
        assert!(response.success);
        assert_eq!(response.data, None);
    }

    #[tokio::test]
    async fn get_data_preserves_leading_zero() {
        let (mut session, _far) = ready("200 result=0042\n").await;
        let response = session.get_data("enter-code", Some(5), Some(4)).await.unwrap();
        assert!(response.success);
        assert_eq!(response.data, Some(AgiValue::Str("0042".to_string())));
    }

    #[tokio::test]
    async fn get_data_plain_integer() {
        let (mut session, _far) = ready("200 result=1234\n").await;
        let response = session.get_data("enter-code", None, None).await.unwrap();
        assert_eq!(response.data, Some(AgiValue::Int(1234)));
    }

    #[tokio::test]
    async fn get_variable_found_and_missing() {
        let (mut session, _far) =
            ready("200 result=1 (inbound)\n200 result=0\n").await;

        let found = session.get_variable("DIRECTION").await.unwrap();
        assert!(found.success);
        assert_eq!(found.data_str(), Some("inbound"));

        let missing = session.get_variable("NO_SUCH_VAR").await.unwrap();
        assert!(!missing.success);
        assert_eq!(missing.data, None);
    }

    #[tokio::test]
    async fn database_get_returns_value() {
        let (mut session, _far) = ready("200 result=1 (alice)\n").await;
        let response = session.database_get("users", "1000").await.unwrap();
        assert!(response.success);
        assert_eq!(response.data_str(), Some("alice"));
    }

    #[tokio::test]
    async fn exec_maps_results() {
        let (mut session, _far) =
            ready("200 result=1 (OK)\n200 result=3\n200 result=-2\n").await;

        let with_payload = session.exec("Playback welcome").await.unwrap();
        assert!(with_payload.success);
        assert_eq!(with_payload.data_str(), Some("OK"));

        let without_payload = session.exec("Wait 1").await.unwrap();
        assert_eq!(without_payload.data, Some(AgiValue::Int(3)));

        let err = session.exec("NoSuchApp").await.unwrap_err();
        assert!(matches!(err, AgiError::Command { .. }));
    }

    #[tokio::test]
    async fn receive_char_unsupported_channel() {
        let (mut session, _far) = ready("200 result=0\n").await;
        let err = session.receive_char(2).await.unwrap_err();
        assert!(matches!(err, AgiError::Command { .. }));
    }

    #[tokio::test]
    async fn receive_char_decodes_character() {
        // 104 is 'h'
        let (mut session, _far) = ready("200 result=104\n").await;
        let response = session.receive_char(2).await.unwrap();
        assert_eq!(response.data_char(), Some('h'));
    }

    #[tokio::test]
    async fn tdd_mode_not_capable_is_channel_error() {
        let (mut session, _far) = ready("200 result=0\n").await;
        let err = session.tdd_mode(Toggle::On).await.unwrap_err();
        assert!(matches!(err, AgiError::Channel { .. }));
    }

    #[tokio::test]
    async fn channel_status_describes_state() {
        let (mut session, _far) = ready("200 result=6\n").await;
        let response = session.channel_status(None).await.unwrap();
        assert!(response.success);
        assert_eq!(response.data_str(), Some("UP"));
    }

    #[tokio::test]
    async fn background_plays_all_files_when_uninterrupted() {
        let (mut session, far) =
            ready("200 result=0\n200 result=0\n200 result=0\n").await;
        let response = session
            .background(&["a", "b", "c"], "")
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.data, None);

        let sent = sent_lines(session, far).await;
        assert!(sent.contains("STREAM FILE a"));
        assert!(sent.contains("STREAM FILE b"));
        assert!(sent.contains("STREAM FILE c"));
    }

    #[tokio::test]
    async fn background_stops_on_early_dtmf() {
        // streaming "b" yields digit '1' (code 49); "c" must never play
        let (mut session, far) = ready("200 result=0\n200 result=49\n").await;
        let response = session
            .background(&["a", "b", "c"], "123")
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.data_char(), Some('1'));

        let sent = sent_lines(session, far).await;
        assert!(sent.contains("STREAM FILE a"));
        assert!(sent.contains("STREAM FILE b"));
        assert!(!sent.contains("STREAM FILE c"));
    }

    #[tokio::test]
    async fn background_propagates_channel_failure() {
        let (mut session, _far) = ready("200 result=0\n200 result=-1\n").await;
        let err = session.background(&["a", "b", "c"], "").await.unwrap_err();
        assert!(matches!(err, AgiError::Channel { .. }));
    }

    #[tokio::test]
    async fn background_requires_files() {
        let (mut session, _far) = ready("").await;
        let err = session.background::<&str>(&[], "").await.unwrap_err();
        assert!(matches!(err, AgiError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn background_digits_expands_per_character() {
        let (mut session, far) = ready("200 result=0\n200 result=0\n").await;
        let response = session.background_digits("4#", "").await.unwrap();
        assert!(response.success);

        let sent = sent_lines(session, far).await;
        assert!(sent.contains("STREAM FILE digits/4"));
        assert!(sent.contains("STREAM FILE digits/#"));
    }

    #[tokio::test]
    async fn commands_are_written_verbatim() {
        let (mut session, far) = ready("200 result=1\n").await;
        session.set_variable("CALLERID(name)", "Bob").await.unwrap();
        let sent = sent_lines(session, far).await;
        assert!(sent.ends_with("SET VARIABLE CALLERID(name) Bob\n"));
    }

    #[tokio::test]
    async fn last_response_records_raw_line() {
        let (mut session, _far) = ready("200 result=1 (hello world)\n").await;
        session.get_variable("GREETING").await.unwrap();
        assert_eq!(session.last_response(), Some("200 result=1 (hello world)"));
    }

    #[test]
    fn parse_channel_param_shapes() {
        assert_eq!(
            parse_channel_param("agi_language: en"),
            Some(("language", "en"))
        );
        assert_eq!(
            parse_channel_param("agi_request: agi://host:4573/app"),
            Some(("request", "agi://host:4573/app"))
        );
        assert_eq!(parse_channel_param("language: en"), None);
        assert_eq!(parse_channel_param("agi_empty:"), None);
        assert_eq!(parse_channel_param("junk"), None);
    }
}
