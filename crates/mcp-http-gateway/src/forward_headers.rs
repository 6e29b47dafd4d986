//! Capture of forwardable inbound headers.
//!
//! Credential-bearing headers on the inbound MCP request (anything whose
//! name contains `auth`, `key`, `api`, or `cookie`) are snapshotted into a
//! request extension before the protocol layer runs, and layered onto every
//! upstream call the session makes.

use axum::{extract::Request, middleware::Next, response::Response};
use http::{HeaderMap, HeaderName};

const MARKERS: [&str; 4] = ["auth", "key", "api", "cookie"];

/// The captured headers, read back from the request context the same way an
/// auth layer would propagate a validated token.
#[derive(Debug, Clone, Default)]
pub struct ForwardHeaders(pub HeaderMap);

/// Header names are lowercase in the `http` representation, so a plain
/// substring check suffices.
pub fn is_forwardable(name: &HeaderName) -> bool {
    let name = name.as_str();
    MARKERS.iter().any(|marker| name.contains(marker))
}

pub async fn capture_forward_headers(mut request: Request, next: Next) -> Response {
    let mut captured = HeaderMap::new();
    for (name, value) in request.headers() {
        if is_forwardable(name) {
            captured.append(name.clone(), value.clone());
        }
    }
    request.extensions_mut().insert(ForwardHeaders(captured));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use rstest::rstest;

    #[rstest]
    #[case("authorization", true)]
    #[case("x-api-key", true)]
    #[case("proxy-authorization", true)]
    #[case("cookie", true)]
    #[case("x-openai-key", true)]
    #[case("content-type", false)]
    #[case("accept", false)]
    #[case("mcp-session-id", false)]
    fn marker_headers_are_forwardable(#[case] name: &str, #[case] expected: bool) {
        let name = HeaderName::from_bytes(name.as_bytes()).unwrap();
        assert_eq!(is_forwardable(&name), expected);
    }

    #[test]
    fn capture_keeps_every_matching_header_verbatim() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer tok"));
        headers.insert("x-api-key", HeaderValue::from_static("k1"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let mut captured = HeaderMap::new();
        for (name, value) in &headers {
            if is_forwardable(name) {
                captured.append(name.clone(), value.clone());
            }
        }
        assert_eq!(captured.len(), 2);
        assert_eq!(
            captured.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer tok")
        );
        assert_eq!(
            captured.get("x-api-key").and_then(|v| v.to_str().ok()),
            Some("k1")
        );
    }
}
