use std::fmt;

/// Failure of a single `send`.
///
/// Every variant is terminal for the send that produced it and is reported to
/// the guest as an event, never as a thrown value. Aborting is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XhrError {
    /// Malformed method or URL, or the body could not be encoded.
    /// Fires `error` on the main object only.
    Construction(String),
    /// The native call ran past the configured `timeout`.
    /// Fires `timeout` on upload then main.
    DeadlineExceeded,
    /// Any other native I/O failure (DNS, connect, TLS, body upload).
    /// Fires `error` on upload then main.
    Transport(String),
    /// Streaming the response body failed after headers were received.
    /// Fires `error` on the main object only.
    Read(String),
}

impl XhrError {
    /// Classify a failed native call.
    ///
    /// A deadline expiry only counts as `DeadlineExceeded` when the guest
    /// configured a nonzero timeout; otherwise it is a plain transport error.
    pub fn from_send_error(err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() && timeout_ms > 0 {
            return XhrError::DeadlineExceeded;
        }

        if err.is_builder() {
            return XhrError::Construction(err.to_string());
        }

        XhrError::Transport(error_chain(err))
    }

    /// Whether the upload sub-object observes this failure too.
    pub fn reaches_upload(&self) -> bool {
        matches!(self, XhrError::DeadlineExceeded | XhrError::Transport(_))
    }
}

impl fmt::Display for XhrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XhrError::Construction(msg) => write!(f, "Failed to construct request: {}", msg),
            XhrError::DeadlineExceeded => write!(f, "Request timed out"),
            XhrError::Transport(msg) => write!(f, "Request failed: {}", msg),
            XhrError::Read(msg) => write!(f, "Failed to read response body: {}", msg),
        }
    }
}

impl std::error::Error for XhrError {}

/// Flatten an error and its sources into one line.
///
/// reqwest hides the interesting part (connection refused, proxy handshake)
/// in the source chain.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();

    while let Some(inner) = source {
        msg.push_str(": ");
        msg.push_str(&inner.to_string());
        source = inner.source();
    }

    msg
}
