use std::fmt;
use std::io;

use panelink_frame::FrameError;
use panelink_protocol::ProtocolError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::BodyTooLarge { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn protocol_error(context: &str, err: ProtocolError) -> CliError {
    match err {
        ProtocolError::Frame(err) => frame_error(context, err),
        ProtocolError::DeliveryTimeout { .. } => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        ProtocolError::Closed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        ProtocolError::Cancelled => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_timeout_maps_to_timeout_code() {
        let err = protocol_error(
            "send failed",
            ProtocolError::DeliveryTimeout {
                sequence: 4,
                attempts: 3,
            },
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.contains("after 3 attempt(s)"));
    }

    #[test]
    fn oversized_body_is_invalid_data() {
        let err = protocol_error(
            "send failed",
            ProtocolError::Frame(FrameError::BodyTooLarge { size: 9, max: 8 }),
        );
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn missing_socket_is_plain_failure() {
        let err = io_error(
            "connect failed",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(err.code, FAILURE);
    }
}
