use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// The cluster already has a connector with this name (HTTP 409 on the
    /// REST surface). Provisioning effects absorb this as success.
    #[error("connector {0} already exists")]
    AlreadyExists(String),

    /// No such connector on the cluster (HTTP 404). Decommission effects
    /// absorb this as success; everything else treats it as a failure.
    #[error("connector {0} not found")]
    NotFound(String),

    #[error("cluster returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
