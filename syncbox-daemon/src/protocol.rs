//! Control-channel wire format and command vocabulary.
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes of
//! UTF-8 JSON. Requests are a mapping of command name → payload; replies are
//! `{"message": …}`. The daemon side is async (tokio), the client side is
//! blocking std I/O.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{io_err, DaemonError};

pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Frames larger than this are treated as a protocol break.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

pub const SHUTDOWN_COMMAND: &str = "shutdown";
pub const REGISTER_USER_COMMAND: &str = "reguser";

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// One decoded entry of a control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    RegisterUser { username: String, password: String },
    Shutdown,
    /// Anything else is handed to the remote client untouched.
    PassThrough { command: String, payload: Value },
}

impl ControlCommand {
    pub fn decode(name: &str, payload: Value) -> Result<Self, DaemonError> {
        match name {
            SHUTDOWN_COMMAND => Ok(ControlCommand::Shutdown),
            REGISTER_USER_COMMAND => match payload {
                Value::Array(items) => match items.as_slice() {
                    [Value::String(username), Value::String(password)] => {
                        Ok(ControlCommand::RegisterUser {
                            username: username.clone(),
                            password: password.clone(),
                        })
                    }
                    _ => Err(DaemonError::Protocol(
                        "reguser expects [username, password]".to_string(),
                    )),
                },
                _ => Err(DaemonError::Protocol(
                    "reguser expects [username, password]".to_string(),
                )),
            },
            other => Ok(ControlCommand::PassThrough {
                command: other.to_string(),
                payload,
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ControlCommand::RegisterUser { .. } => REGISTER_USER_COMMAND,
            ControlCommand::Shutdown => SHUTDOWN_COMMAND,
            ControlCommand::PassThrough { command, .. } => command,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ControlCommand::RegisterUser { username, password } => {
                Value::Array(vec![username.clone().into(), password.clone().into()])
            }
            ControlCommand::Shutdown => Value::Array(Vec::new()),
            ControlCommand::PassThrough { payload, .. } => payload.clone(),
        }
    }
}

/// Split a request into its `(command, payload)` entries.
pub fn decode_message(message: Value) -> Result<Vec<(String, Value)>, DaemonError> {
    match message {
        Value::Object(entries) => Ok(entries.into_iter().collect()),
        other => Err(DaemonError::Protocol(format!(
            "control message must be a mapping of command to payload, got {other}"
        ))),
    }
}

pub fn encode_message(commands: &[ControlCommand]) -> Value {
    let mut entries = Map::new();
    for command in commands {
        entries.insert(command.name().to_string(), command.payload());
    }
    Value::Object(entries)
}

/// Reply frame body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub message: Value,
}

impl ControlResponse {
    pub fn new(message: impl Into<Value>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Length prefix plus JSON body of `value`.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, DaemonError> {
    let body = serde_json::to_vec(value)?;
    let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
    check_len(len)?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn check_len(len: u32) -> Result<usize, DaemonError> {
    if len > MAX_FRAME_BYTES {
        return Err(DaemonError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(len as usize)
}

fn read_error(err: std::io::Error) -> DaemonError {
    if err.kind() == ErrorKind::UnexpectedEof {
        DaemonError::ConnectionLost
    } else {
        io_err("control connection", err)
    }
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, DaemonError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_BYTES {
        let n = reader
            .read(&mut prefix[filled..])
            .await
            .map_err(read_error)?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(DaemonError::ConnectionLost);
        }
        filled += n;
    }

    let len = check_len(u32::from_be_bytes(prefix))?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(read_error)?;
    Ok(Some(serde_json::from_slice(&body)?))
}

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), DaemonError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(value)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| io_err("control connection", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("control connection", e))?;
    Ok(())
}

/// Blocking counterpart of [`read_frame`] for the command-line client.
pub fn read_frame_blocking<R, T>(reader: &mut R) -> Result<Option<T>, DaemonError>
where
    R: Read,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_BYTES {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(DaemonError::ConnectionLost),
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(read_error(err)),
        }
    }

    let len = check_len(u32::from_be_bytes(prefix))?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(read_error)?;
    Ok(Some(serde_json::from_slice(&body)?))
}

pub fn write_frame_blocking<W, T>(writer: &mut W, value: &T) -> Result<(), DaemonError>
where
    W: Write,
    T: Serialize,
{
    let frame = encode_frame(value)?;
    writer
        .write_all(&frame)
        .map_err(|e| io_err("control connection", e))?;
    writer
        .flush()
        .map_err(|e| io_err("control connection", e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Client helpers
// ---------------------------------------------------------------------------

fn connect(address: &str) -> Result<TcpStream, DaemonError> {
    TcpStream::connect(address).map_err(|err| {
        if matches!(
            err.kind(),
            ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                address: address.to_string(),
            }
        } else {
            io_err(address, err)
        }
    })
}

/// Send one command and wait for its `message`.
pub fn request(address: &str, command: &ControlCommand) -> Result<Value, DaemonError> {
    let mut stream = connect(address)?;
    write_frame_blocking(&mut stream, &encode_message(std::slice::from_ref(command)))?;
    match read_frame_blocking::<_, ControlResponse>(&mut stream)? {
        Some(response) => Ok(response.message),
        None => Err(DaemonError::ConnectionLost),
    }
}

pub fn request_register_user(
    address: &str,
    username: &str,
    password: &str,
) -> Result<Value, DaemonError> {
    request(
        address,
        &ControlCommand::RegisterUser {
            username: username.to_string(),
            password: password.to_string(),
        },
    )
}

pub fn request_shutdown(address: &str) -> Result<Value, DaemonError> {
    request(address, &ControlCommand::Shutdown)
}

/// Fire a pass-through command; the daemon does not reply to these.
pub fn send_passthrough(address: &str, command: &str, payload: Value) -> Result<(), DaemonError> {
    let mut stream = connect(address)?;
    let message = encode_message(&[ControlCommand::PassThrough {
        command: command.to_string(),
        payload,
    }]);
    write_frame_blocking(&mut stream, &message)
}
