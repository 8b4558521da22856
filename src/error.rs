//! Error taxonomy for the chat core.
//!
//! DESIGN
//! ======
//! Errors are grouped by who makes the recovery decision, not by transport:
//! - [`ConnectError`] — push handshake failures. The hub's backoff loop owns
//!   retry; callers only ever see a boolean connection state.
//! - [`SendError`] — a message send did not complete. Always propagated so the
//!   caller's optimistic-send logic can roll back and restore the input.
//! - [`FetchError`] — history/list loads. Surfaced inline with a retry
//!   affordance; previously loaded data stays intact.
//!
//! Transport-specific error types (reqwest, tungstenite) never cross this
//! boundary — only human-readable messages do.

/// Push connection handshake failure.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// No access token available from the credential provider.
    #[error("no access token available")]
    NoToken,
    /// The websocket handshake did not complete.
    #[error("hub handshake failed: {0}")]
    Handshake(String),
}

/// A message send (REST or push) did not complete.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Push send attempted while the hub is not connected. Callers fall back
    /// to the REST transport.
    #[error("not connected to the chat hub")]
    NotConnected,
    /// The request exceeded its deadline.
    #[error("message send timed out")]
    Timeout,
    /// The server rejected the send.
    #[error("message rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The request never reached the server.
    #[error("network error while sending: {0}")]
    Network(String),
}

/// A history or conversation-list load failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request exceeded its deadline.
    #[error("request timed out")]
    Timeout,
    /// The server answered with a non-success status.
    #[error("request failed ({status}): {message}")]
    Status { status: u16, message: String },
    /// The request never reached the server.
    #[error("network error: {0}")]
    Network(String),
    /// The response body was not in any recognized shape.
    #[error("unrecognized response payload: {0}")]
    Decode(String),
}

/// Configuration could not be built from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} required")]
    MissingVar(&'static str),
    #[error("http client build failed: {0}")]
    HttpClient(String),
}
