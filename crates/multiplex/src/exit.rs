use std::fmt;
use std::io;

use multiplex_frame::FrameError;
use multiplex_socket::SocketError;
use multiplex_transport::TransportError;

// Process exit codes for the multiplex CLI.
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
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::AddrInUse => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::ConnectTimeout { .. } | TransportError::IdleTimeout(_) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        TransportError::FrameTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        TransportError::Closed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn socket_error(context: &str, err: SocketError) -> CliError {
    match err {
        SocketError::ConnectFailed(err) | SocketError::Transport(err) => {
            transport_error(context, err)
        }
        SocketError::Frame(err) => frame_error(context, err),
        SocketError::RecvTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        SocketError::Serialize(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        SocketError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
        SocketError::ChannelClosed(_)
        | SocketError::ChannelLost(_)
        | SocketError::SendFailed(_)
        | SocketError::BindFailed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn recv_timeout_maps_to_124() {
        let err = socket_error(
            "request failed",
            SocketError::RecvTimeout {
                id: 1,
                timeout: Duration::from_secs(1),
            },
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("request failed: "));
    }

    #[test]
    fn refused_connect_maps_to_failure() {
        let err = socket_error(
            "connect failed",
            SocketError::ConnectFailed(TransportError::Connect {
                addr: "127.0.0.1:1".into(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
        );
        assert_eq!(err.code, FAILURE);
    }

    #[test]
    fn connect_timeout_maps_to_124() {
        let err = socket_error(
            "connect failed",
            SocketError::ConnectFailed(TransportError::ConnectTimeout {
                addr: "10.0.0.1:9601".into(),
                timeout: Duration::from_millis(500),
            }),
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn oversized_frame_maps_to_data_invalid() {
        let err = socket_error(
            "send failed",
            SocketError::Frame(FrameError::TooLarge { size: 100, max: 16 }),
        );
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn closed_channel_maps_to_failure() {
        assert_eq!(
            socket_error("recv failed", SocketError::ChannelClosed(4)).code,
            FAILURE
        );
    }
}
