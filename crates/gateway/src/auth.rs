//! Stream authentication.
//!
//! The token travels in the `authorization` transport header, either bare
//! or as `Bearer <token>`. Clients that cannot set headers (browsers
//! opening a WebSocket) may fall back to a `?token=` query parameter.
//! Validation is delegated to the metadata store, whose failure mode is a
//! single opaque error — no user enumeration.

use axum::http::HeaderMap;
use uuid::Uuid;

use rt_domain::error::{Error, Result};
use rt_store::MetadataStore;

/// Extract the presented token from the header (preferred) or the query
/// fallback.
pub fn presented_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let from_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
        .filter(|v| !v.is_empty())
        .map(str::to_owned);

    from_header.or_else(|| {
        query_token
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
    })
}

/// Resolve the presented token to its owning user.
pub fn authenticate(
    store: &MetadataStore,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Uuid> {
    let token = presented_token(headers, query_token).ok_or(Error::Auth)?;
    store.authenticate_token(&token)
}
