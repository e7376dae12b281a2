//! Remote catalog contract.
//!
//! A source answers two kinds of request: a listing page filtered by caller
//! criteria plus an inclusive lower bound on the sort attribute, and a single
//! item's full detail. Over-limit responses are not errors; they come back as
//! [`Reply::OverLimit`] so the rate governor can decide how long to wait.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::domain::{EntityType, Filter, HeaderItem, ItemId, Record, SortValue};

/// Boxed future returned by [`RemoteSource`] methods.
pub type SourceFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<Reply<T>, SourceError>> + Send + 'a>>;

/// Outcome of a call that reached the remote service.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    /// Payload plus the remaining-quota header, when the service sent one.
    Data {
        body: T,
        quota_remaining: Option<u32>,
    },
    /// The service refused the request because the quota is spent.
    OverLimit,
}

impl<T> Reply<T> {
    pub fn data(body: T, quota_remaining: Option<u32>) -> Self {
        Self::Data {
            body,
            quota_remaining,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        match self {
            Self::Data {
                body,
                quota_remaining,
            } => Reply::Data {
                body: f(body),
                quota_remaining,
            },
            Self::OverLimit => Reply::OverLimit,
        }
    }
}

/// One listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub entity: EntityType,
    pub filters: Vec<Filter>,
    pub sort_key: String,
    /// Inclusive lower bound on the sort attribute.
    pub lower_bound: Option<SortValue>,
    /// 1-based.
    pub page_number: u32,
    pub page_size: u32,
}

/// One listing response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageEnvelope {
    pub items: Vec<HeaderItem>,
    pub page_number: u32,
    pub total_elements: u64,
    pub total_pages: u32,
    pub last_page: bool,
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Unavailable,
    NotFound,
    DuplicatedOnServer,
    Malformed,
    InvalidRequest,
    Unauthorized,
    Internal,
}

/// Structured source error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::NotFound,
            message: message.into(),
            retryable: false,
        }
    }

    /// The service holds more than one row for an identifier and refuses to
    /// serve any of them.
    pub fn duplicated_on_server(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::DuplicatedOnServer,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Malformed,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unauthorized,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::DuplicatedOnServer => "source.duplicated_on_server",
            SourceErrorKind::Malformed => "source.malformed",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::Unauthorized => "source.unauthorized",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Remote catalog serving paginated listings and per-item details.
pub trait RemoteSource: Send + Sync {
    fn fetch_page<'a>(&'a self, request: PageRequest) -> SourceFuture<'a, PageEnvelope>;

    fn fetch_detail<'a>(&'a self, entity: EntityType, id: &'a ItemId) -> SourceFuture<'a, Record>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_errors_are_retryable() {
        assert!(SourceError::unavailable("503").retryable());
        for error in [
            SourceError::not_found("gone"),
            SourceError::duplicated_on_server("dup"),
            SourceError::malformed("bad json"),
            SourceError::invalid_request("400"),
            SourceError::unauthorized("403"),
        ] {
            assert!(!error.retryable(), "{error}");
        }
    }

    #[test]
    fn map_keeps_quota_header() {
        let reply = Reply::data(2_u32, Some(41)).map(|value| value * 10);
        assert_eq!(reply, Reply::data(20, Some(41)));
        assert_eq!(Reply::<u32>::OverLimit.map(|value| value + 1), Reply::OverLimit);
    }
}
