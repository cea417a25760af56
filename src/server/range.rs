//! Range-aware response construction for fully buffered audio payloads.
//!
//! Browsers seek within audio by issuing `Range: bytes=start-end` requests.
//! The payload is always complete in memory, so serving a range is a slice
//! plus the matching 206 headers.

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use bytes::Bytes;

const AUDIO_MIME: &str = "audio/mpeg";

/// What a `Range` header asks for, resolved against the payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No (or non-bytes) range header: serve everything.
    Full,
    /// A satisfiable `bytes=start-end` range, both bounds inclusive.
    Partial { start: u64, end: u64 },
    /// Malformed or out-of-bounds request: answer 416.
    Unsatisfiable,
}

/// Resolves an optional `Range` header against a payload of `total` bytes.
///
/// `start` is the first numeric token before `-`; `end` is the second if
/// present, otherwise `total - 1`. Ranges with `start > end`, `start >= total`
/// or unparsable tokens are unsatisfiable.
pub fn resolve_range(header: Option<&str>, total: u64) -> RangeRequest {
    let Some(header) = header else {
        return RangeRequest::Full;
    };

    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        // Unknown unit: ignore the header rather than failing the request.
        return RangeRequest::Full;
    };

    let mut parts = spec.splitn(2, '-');

    let start = match parts.next().map(str::trim) {
        Some(token) if !token.is_empty() => match token.parse::<u64>() {
            Ok(value) => value,
            Err(_) => return RangeRequest::Unsatisfiable,
        },
        _ => return RangeRequest::Unsatisfiable,
    };

    let end = match parts.next().map(str::trim) {
        Some(token) if !token.is_empty() => match token.parse::<u64>() {
            // Clients may ask past the end; clamp like ordinary file servers.
            Ok(value) => value.min(total.saturating_sub(1)),
            Err(_) => return RangeRequest::Unsatisfiable,
        },
        _ => total.saturating_sub(1),
    };

    if total == 0 || start >= total || start > end {
        return RangeRequest::Unsatisfiable;
    }

    RangeRequest::Partial { start, end }
}

/// Builds the HTTP response for a cached payload and an optional range header.
pub fn audio_response(payload: Bytes, range_header: Option<&str>) -> Response {
    let total = payload.len() as u64;

    match resolve_range(range_header, total) {
        RangeRequest::Full => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, AUDIO_MIME)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_LENGTH, total)
            .body(Body::from(payload))
            .expect("static response construction"),
        RangeRequest::Partial { start, end } => {
            let slice = payload.slice(start as usize..=end as usize);
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, AUDIO_MIME)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(
                    header::CONTENT_RANGE,
                    HeaderValue::from_str(&format!("bytes {start}-{end}/{total}"))
                        .expect("numeric content-range"),
                )
                .header(header::CONTENT_LENGTH, end - start + 1)
                .body(Body::from(slice))
                .expect("static response construction")
        }
        RangeRequest::Unsatisfiable => Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes */{total}")).expect("numeric content-range"),
            )
            .body(Body::empty())
            .expect("static response construction"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payload(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn no_header_is_full() {
        assert_eq!(resolve_range(None, 1000), RangeRequest::Full);
    }

    #[test]
    fn bounded_range_resolves() {
        assert_eq!(
            resolve_range(Some("bytes=0-99"), 1000),
            RangeRequest::Partial { start: 0, end: 99 }
        );
    }

    #[test]
    fn open_ended_range_runs_to_last_byte() {
        assert_eq!(
            resolve_range(Some("bytes=500-"), 1000),
            RangeRequest::Partial {
                start: 500,
                end: 999
            }
        );
    }

    #[test]
    fn overlong_end_is_clamped() {
        assert_eq!(
            resolve_range(Some("bytes=10-5000"), 1000),
            RangeRequest::Partial {
                start: 10,
                end: 999
            }
        );
    }

    #[test]
    fn out_of_bounds_and_inverted_ranges_are_unsatisfiable() {
        assert_eq!(
            resolve_range(Some("bytes=1000-1001"), 1000),
            RangeRequest::Unsatisfiable
        );
        assert_eq!(
            resolve_range(Some("bytes=50-10"), 1000),
            RangeRequest::Unsatisfiable
        );
        assert_eq!(
            resolve_range(Some("bytes=abc-def"), 1000),
            RangeRequest::Unsatisfiable
        );
        assert_eq!(
            resolve_range(Some("bytes=0-0"), 0),
            RangeRequest::Unsatisfiable
        );
    }

    #[test]
    fn non_bytes_unit_is_ignored() {
        assert_eq!(resolve_range(Some("items=0-5"), 1000), RangeRequest::Full);
    }

    #[tokio::test]
    async fn full_response_headers() {
        let response = audio_response(payload(1000), None);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "audio/mpeg"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            "1000"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, payload(1000));
    }

    #[tokio::test]
    async fn partial_response_headers_and_body() {
        let data = payload(1000);
        let response = audio_response(data.clone(), Some("bytes=0-99"));

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 0-99/1000"
        );
        assert_eq!(
            response.headers().get(header::ACCEPT_RANGES).unwrap(),
            "bytes"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            "100"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, data.slice(0..100));
    }

    #[tokio::test]
    async fn unsatisfiable_response_is_416() {
        let response = audio_response(payload(1000), Some("bytes=2000-"));
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */1000"
        );
    }
}
