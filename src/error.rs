use reqwest::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

/// Conditions that leave a component. Decoding problems and 504 misses on
/// case cards are absorbed where they happen and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid credential state: {0}")]
    InvalidCredentialState(String),

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("session expired (HTTP 401 from {url})")]
    SessionExpired { url: String },

    #[error("upstream returned {status} for {url}")]
    Upstream { url: String, status: StatusCode },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("extraction of document {id} stopped without a result")]
    WorkerLost { id: String },

    #[error("unexpected payload from {url}: {source}")]
    Payload {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::SessionExpired { .. })
    }

    /// True for every failure the driver may treat as "skip this unit of work".
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::Upstream { .. } | Error::Transport { .. } | Error::Payload { .. }
        )
    }
}

/// Map a response status onto the taxonomy: 401 is its own condition, every
/// other non-2xx is an upstream failure.
pub fn check_status(url: &str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::UNAUTHORIZED {
        Err(Error::SessionExpired { url: url.to_string() })
    } else {
        Err(Error::Upstream {
            url: url.to_string(),
            status,
        })
    }
}
