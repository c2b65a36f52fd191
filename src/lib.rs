//! Asterisk AGI client and FastAGI server for tokio
//!
//! This crate speaks the Asterisk Gateway Interface: the line-oriented,
//! half-duplex protocol Asterisk uses to hand call control to an external
//! program. It provides two layers:
//!
//! - [`AgiSession`]: one AGI conversation over any `AsyncRead + AsyncWrite`
//!   transport. It consumes the initialization block Asterisk sends on
//!   connect, then executes commands one at a time, decoding each response
//!   into an [`AgiResponse`] with a per-command success mapping.
//! - [`AgiServer`]: a FastAGI TCP server that accepts connections from
//!   Asterisk and dispatches each to a [`CallHandler`] on a dynamically
//!   sized worker pool. Handler errors and panics are contained per call.
//!
//! A minimal FastAGI application:
//!
//! ```rust,no_run
//! use asterisk_agi_tokio::{
//!     AgiResult, AgiServer, AgiServerConfig, AgiSession, CallHandler,
//! };
//! use async_trait::async_trait;
//! use std::collections::HashMap;
//! use tokio::net::TcpStream;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl CallHandler for Greeter {
//!     async fn handle_call(
//!         &self,
//!         session: &mut AgiSession<TcpStream>,
//!         _params: &HashMap<String, String>,
//!     ) -> AgiResult<()> {
//!         session.answer().await?;
//!         let extension = session
//!             .channel_param("extension")
//!             .unwrap_or("unknown")
//!             .to_string();
//!         session.verbose(&format!("greeting {}", extension), 1).await?;
//!         session.stream_file("hello-world", "", None).await?;
//!         session.hangup(None).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> AgiResult<()> {
//!     let mut server = AgiServer::bind(AgiServerConfig::default()).await?;
//!     server.run(Greeter).await;
//!     Ok(())
//! }
//! ```
//!
//! The raw protocol pieces ([`AgiCommand`], [`decode_response_line`]) are
//! public for callers that need an escape hatch past the typed wrappers.

pub mod channel;
pub mod command;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod response;
pub mod server;
pub mod session;

pub use channel::ChannelStatus;
pub use command::{AgiCommand, Toggle};
pub use error::{AgiError, AgiResult};
pub use protocol::{decode_response_line, AgiValue, DecodedResult};
pub use registry::{ServerRegistry, ShutdownHandle};
pub use response::AgiResponse;
pub use server::{AgiServer, AgiServerConfig, CallHandler};
pub use session::{AgiSession, SessionState};
