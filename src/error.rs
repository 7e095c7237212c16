use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::response::RestResponse;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("IN condition on `{0}` has no values")]
    EmptyInCondition(String),

    #[error("primary key of `{0}` can not be empty")]
    MissingPrimaryKey(String),

    #[error("unknown attribute `{attribute}` on `{type_name}`")]
    UnknownAttribute {
        type_name: String,
        attribute: String,
    },

    #[error("unknown relation `{relation}` on `{type_name}`")]
    UnknownRelation {
        type_name: String,
        relation: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("request cancelled")]
    Cancelled,
}

impl Error {
    /// Only HTTP failures of a retryable kind qualify. Compilation and
    /// configuration errors never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(err) => err.kind.is_retryable(),
            _ => false,
        }
    }

    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            Error::Http(err) => Some(err),
            _ => None,
        }
    }

    pub fn unknown_attribute(type_name: &str, attribute: &str) -> Self {
        Error::UnknownAttribute {
            type_name: type_name.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    NotAllowed,
    NotAcceptable,
    DataValidation,
    TooManyRequests,
    ServerError,
    ServiceUnavailable,
    Other(u16),
}

impl HttpErrorKind {
    /// Classifies a status code. Success codes yield `None`.
    pub fn from_status(status: u16) -> Option<Self> {
        let kind = match status {
            200..=299 => return None,
            400 => HttpErrorKind::BadRequest,
            401 => HttpErrorKind::Unauthorized,
            403 => HttpErrorKind::Forbidden,
            404 => HttpErrorKind::NotFound,
            405 => HttpErrorKind::NotAllowed,
            406 => HttpErrorKind::NotAcceptable,
            422 => HttpErrorKind::DataValidation,
            429 => HttpErrorKind::TooManyRequests,
            500 => HttpErrorKind::ServerError,
            503 => HttpErrorKind::ServiceUnavailable,
            other => HttpErrorKind::Other(other),
        };
        Some(kind)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HttpErrorKind::TooManyRequests
                | HttpErrorKind::ServerError
                | HttpErrorKind::ServiceUnavailable
        )
    }

    pub fn status(&self) -> u16 {
        match self {
            HttpErrorKind::BadRequest => 400,
            HttpErrorKind::Unauthorized => 401,
            HttpErrorKind::Forbidden => 403,
            HttpErrorKind::NotFound => 404,
            HttpErrorKind::NotAllowed => 405,
            HttpErrorKind::NotAcceptable => 406,
            HttpErrorKind::DataValidation => 422,
            HttpErrorKind::TooManyRequests => 429,
            HttpErrorKind::ServerError => 500,
            HttpErrorKind::ServiceUnavailable => 503,
            HttpErrorKind::Other(status) => *status,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpErrorKind::BadRequest => "bad_request",
            HttpErrorKind::Unauthorized => "unauthorized",
            HttpErrorKind::Forbidden => "forbidden",
            HttpErrorKind::NotFound => "not_found",
            HttpErrorKind::NotAllowed => "not_allowed",
            HttpErrorKind::NotAcceptable => "not_acceptable",
            HttpErrorKind::DataValidation => "data_validation",
            HttpErrorKind::TooManyRequests => "too_many_requests",
            HttpErrorKind::ServerError => "server_error",
            HttpErrorKind::ServiceUnavailable => "service_unavailable",
            HttpErrorKind::Other(_) => "other",
        }
    }
}

impl Display for HttpErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpErrorKind::BadRequest => write!(f, "Bad request"),
            HttpErrorKind::Unauthorized => write!(f, "Unauthorized"),
            HttpErrorKind::Forbidden => write!(f, "Forbidden"),
            HttpErrorKind::NotFound => write!(f, "Not found"),
            HttpErrorKind::NotAllowed => write!(f, "Not allowed"),
            HttpErrorKind::NotAcceptable => write!(f, "Not acceptable"),
            HttpErrorKind::DataValidation => write!(f, "Data validation failed"),
            HttpErrorKind::TooManyRequests => write!(f, "Too many requests"),
            HttpErrorKind::ServerError => write!(f, "Server error"),
            HttpErrorKind::ServiceUnavailable => write!(f, "Service unavailable"),
            HttpErrorKind::Other(status) => write!(f, "Unexpected status {}", status),
        }
    }
}

/// A non-success response, kept whole so callers can inspect it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} (HTTP {})", .kind, .response.status)]
pub struct HttpError {
    pub kind: HttpErrorKind,
    pub response: RestResponse,
}

impl HttpError {
    pub fn new(kind: HttpErrorKind, response: RestResponse) -> Self {
        Self { kind, response }
    }

    pub fn status(&self) -> u16 {
        self.response.status
    }

    /// Server-suggested wait, normalized to a delta from now.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_at(Utc::now())
    }

    pub fn retry_after_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        parse_retry_after(self.response.header("retry-after")?, now)
    }

    pub fn allow(&self) -> Option<&str> {
        self.response.header("allow")
    }

    pub fn content_negotiation(&self) -> BTreeMap<&'static str, String> {
        ["Accept", "Accept-Charset", "Accept-Encoding", "Accept-Language"]
            .into_iter()
            .filter_map(|name| {
                self.response
                    .header(name)
                    .filter(|value| !value.is_empty())
                    .map(|value| (name, value.to_string()))
            })
            .collect()
    }
}

/// `Retry-After` is either delta-seconds or an HTTP-date. Dates in the past
/// collapse to a zero wait.
pub(crate) fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let delta = (at - now).num_milliseconds().max(0);
    Some(Duration::from_millis(delta as u64))
}
