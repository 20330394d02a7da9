use std::io::{self, Read, Write};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, trace};

use crate::codec::{self, EncodingError};
use crate::dialogue::{Dialogue, Outcome, Step};
use crate::request::Request;
use crate::transport::{ConnectError, Endpoint, IucvStream};

/// Inactivity ceiling applied to every receive
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(600);

/// Largest single message read from the server
pub const RECEIVE_BUFFER_LEN: usize = 1000;

/// Errors from one command session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("failed to set the receive timeout: {0}")]
    SetTimeout(io::Error),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("failed to send to the server: {0}")]
    Send(io::Error),
    #[error("server response timeout after {}s", .0.as_secs())]
    ReceiveTimeout(Duration),
    #[error("failed to receive from the server: {0}")]
    Receive(io::Error),
    #[error("server closed the connection before the command completed")]
    PeerClosedEarly,
}

/// Connect to `endpoint`, run one command and close the connection.
pub fn run_command(
    endpoint: &Endpoint,
    timeout: Duration,
    request: Request,
) -> Result<Outcome, SessionError> {
    info!(code = "IUCVCLNT002", cmd = %request, "Processing user command");

    let stream = IucvStream::connect(endpoint)?;
    if let Err(e) = stream.set_read_timeout(timeout) {
        error!(code = "IUCVCLNT025", error = %e, "Failed to set timeout to the socket");
        return Err(SessionError::SetTimeout(e));
    }

    let result = drive(stream, request, timeout);
    if let Err(e) = &result {
        error!(code = "IUCVCLNT022", error = %e, "Response is received from the server with error");
    }
    result
}

/// Run the dialogue for `request` over an established stream.
///
/// The stream is consumed and dropped before this returns, whatever the
/// outcome. `timeout` is only used to describe a receive timeout; the stream
/// itself is expected to enforce it.
pub fn drive<S: Read + Write>(
    mut stream: S,
    request: Request,
    timeout: Duration,
) -> Result<Outcome, SessionError> {
    let mut dialogue = Dialogue::new(request);
    let mut buf = [0u8; RECEIVE_BUFFER_LEN];

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                error!(
                    code = "IUCVCLNT017",
                    prompts = dialogue.prompt_count(),
                    "Server connection closed"
                );
                return Err(SessionError::PeerClosedEarly);
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                error!(code = "IUCVCLNT016", timeout_secs = timeout.as_secs(), "Server response timeout");
                return Err(SessionError::ReceiveTimeout(timeout));
            }
            Err(e) => {
                error!(code = "IUCVCLNT016", error = %e, "Receive failed");
                return Err(SessionError::Receive(e));
            }
        };

        let line = codec::decode_inbound(&buf[..n]);
        trace!(%line, "Received line");

        match dialogue.feed(&line) {
            Step::Absorbed => {}
            Step::Reply(reply) => send_line(&mut stream, &reply)?,
            Step::Finished { reply, outcome } => {
                send_line(&mut stream, &reply)?;
                info!(
                    completion = ?outcome.completion,
                    bytes = outcome.text.len(),
                    truncated = outcome.truncated,
                    "Command completed"
                );
                return Ok(outcome);
            }
        }
    }
}

fn send_line<W: Write>(stream: &mut W, line: &str) -> Result<(), SessionError> {
    let wire = codec::encode_outbound(line)?;
    stream.write_all(&wire).map_err(|e| {
        error!(code = "IUCVCLNT026", error = %e, "Failed to send the command to server");
        SessionError::Send(e)
    })?;
    debug!(code = "IUCVCLNT020", bytes = wire.len(), "Sent line to the server");
    Ok(())
}
