//! Transport and per-request dispatch errors.

use std::net::SocketAddr;

use mc_protocol::EngineError;

/// Failure while handling a single request. Never fatal for the process.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("could not read request body: {0}")]
    Body(#[source] axum::Error),

    #[error(transparent)]
    Form(#[from] FormError),

    #[error("handler returned an invalid content type: {0:?}")]
    ContentType(String),

    #[error("handler returned an invalid HTTP status code: {0}")]
    Status(u32),

    #[error("handler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failure while extracting or binding form data.
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("request Content-Type isn't multipart/form-data")]
    NotForm,

    #[error("malformed multipart body: {0}")]
    Multipart(#[from] multer::Error),

    #[error("could not read form body: {0}")]
    Body(#[source] axum::Error),

    #[error("no such file in form: {field}")]
    NoSuchFile { field: String },

    #[error("multipart: message too large")]
    TooLarge,

    #[error("could not buffer uploaded file: {0}")]
    Spool(#[source] std::io::Error),
}

/// Failure of the HTTP listener itself.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not listen on {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read listener address: {0}")]
    LocalAddr(#[source] std::io::Error),

    #[error("HTTP server on {addr} stopped: {source}")]
    Serve {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
