use thiserror::Error;

/// WebDAV Depth
#[derive(Copy, Clone, Debug)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    pub fn as_str(self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        }
    }
}

/// Result alias every WebDAV operation returns.
pub type DavResult<T> = Result<T, DavError>;

/// Failure taxonomy of the WebDAV layer. All transport and protocol
/// failures funnel into this type; the sync engines branch on it.
#[derive(Debug, Error)]
pub enum DavError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// IO, TLS, DNS or timeout failure before a status was obtained.
    #[error("network error: {0}")]
    Network(#[source] anyhow::Error),

    /// The response body could not be interpreted.
    #[error("parse error: {message}")]
    Parse {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl DavError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        DavError::Http {
            status,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        DavError::Parse {
            message: message.into(),
            source: None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DavError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 401/403: surfaced to the caller immediately, never retried.
    pub fn is_auth(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// 412: drives the push engine's conflict flow.
    pub fn is_precondition_failed(&self) -> bool {
        self.status() == Some(412)
    }

    /// Network failures, 429 and 5xx are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            DavError::Network(_) => true,
            DavError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            DavError::Parse { .. } => false,
        }
    }
}

/// Authentication carried on every request.
#[derive(Clone)]
pub enum Authorization {
    None,
    Basic { username: String, password: String },
    Bearer(String),
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authorization::None => f.write_str("Authorization::None"),
            Authorization::Basic { username, .. } => f
                .debug_struct("Authorization::Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Authorization::Bearer(_) => f.write_str("Authorization::Bearer(<redacted>)"),
        }
    }
}

/// One `<response>` row of a `207 Multi-Status` body.
#[derive(Debug, Clone, Default)]
pub struct MultistatusRow {
    pub href: String,
    /// Response-level status when present, else the propstat status.
    pub status: Option<u16>,
    pub etag: Option<String>,
    pub calendar_data: Option<String>,
    pub ctag: Option<String>,
    pub sync_token: Option<String>,
    pub displayname: Option<String>,
    pub is_collection: bool,
    pub is_calendar: bool,
    pub supported_components: Vec<String>,
    pub current_user_principal: Vec<String>,
    pub calendar_home_set: Vec<String>,
    pub content_type: Option<String>,
}

/// A parsed `207 Multi-Status` body, with the root-level sync token of
/// RFC 6578 responses.
#[derive(Debug, Clone, Default)]
pub struct Multistatus {
    pub rows: Vec<MultistatusRow>,
    pub sync_token: Option<String>,
}
