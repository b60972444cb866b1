use std::error::Error as StdError;

use crate::sync_engine::{FetchError, FetchErrorKind};

/// Maps an HTTP status on `resource` to a fetch failure kind.
pub fn map_status(resource: &str, status: u16) -> FetchError {
    match status {
        401 | 403 => FetchError::new(
            FetchErrorKind::Unauthorized,
            format!("upstream rejected credentials ({status}) while fetching {resource}"),
        ),
        404 => FetchError::new(
            FetchErrorKind::NoData,
            format!("no data upstream for {resource}"),
        ),
        429 => FetchError::new(
            FetchErrorKind::RateLimited,
            format!("rate limited while fetching {resource}"),
        ),
        400..=499 => FetchError::new(
            FetchErrorKind::InvalidInput,
            format!("upstream client error {status} while fetching {resource}"),
        ),
        500..=599 => FetchError::new(
            FetchErrorKind::Unavailable,
            format!("upstream server error {status} while fetching {resource}"),
        ),
        _ => FetchError::new(
            FetchErrorKind::MalformedResponse,
            format!("unexpected HTTP status {status} while fetching {resource}"),
        ),
    }
}

/// Maps transport and decode failures. Anything on the wire is retryable.
pub fn map_reqwest_error(resource: &str, err: reqwest::Error) -> FetchError {
    if let Some(status) = err.status() {
        return map_status(resource, status.as_u16());
    }

    let chain = render_error_chain(&err);
    tracing::debug!(
        event = "source_request_error",
        resource,
        is_timeout = err.is_timeout(),
        is_connect = err.is_connect(),
        is_decode = err.is_decode(),
        error_chain = %chain,
        "reference source request failed"
    );

    if err.is_decode() {
        return FetchError::new(
            FetchErrorKind::MalformedResponse,
            format!("undecodable response for {resource}: {chain}"),
        );
    }
    FetchError::new(
        FetchErrorKind::Unavailable,
        format!("transport error while fetching {resource}: {chain}"),
    )
}

fn render_error_chain(error: &reqwest::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(next) = source {
        parts.push(next.to_string());
        source = next.source();
    }
    parts.join(" | caused_by: ")
}
