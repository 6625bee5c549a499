use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("unable to open devtools socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent already started (listening on {0})")]
    AlreadyStarted(SocketAddr),

    #[error("IO thread exited before startup completed")]
    StartupAborted,

    #[error("failed to spawn IO thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("IO thread panicked")]
    IoThreadPanicked,
}
