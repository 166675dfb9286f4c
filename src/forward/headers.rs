//! Outbound header construction.
//!
//! # Responsibilities
//! - Copy every original header, every value, in order
//! - Drop the framing headers the outbound connection recomputes
//! - Add the proxy headers (`X-Forwarded-*`)
//!
//! # Design Decisions
//! - `X-Forwarded-For` is always a new header instance, never merged
//! - Port, proto and host describe the outermost hop, so an existing non-empty
//!   value is kept

use http::header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::http::CapturedRequest;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Headers describing the original connection's framing.
const FRAMING_HEADERS: [HeaderName; 4] = [HOST, CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION];

/// Build the header map for the shadow copy of `request`.
pub fn forwarded_headers(request: &CapturedRequest) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(request.headers.len() + 4);
    for (name, value) in request.headers.iter() {
        if FRAMING_HEADERS.contains(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let client = request.client_ip().to_string();
    if let Ok(value) = HeaderValue::from_str(&client) {
        headers.append(X_FORWARDED_FOR, value);
    }
    set_if_absent(&mut headers, X_FORWARDED_PORT, HeaderValue::from(request.server_port()));
    set_if_absent(&mut headers, X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    if let Some(host) = request.host().and_then(|h| HeaderValue::from_str(h).ok()) {
        set_if_absent(&mut headers, X_FORWARDED_HOST, host);
    }

    headers
}

fn set_if_absent(headers: &mut HeaderMap, name: HeaderName, value: HeaderValue) {
    let present = headers.get(&name).is_some_and(|v| !v.is_empty());
    if !present {
        headers.insert(name, value);
    }
}
