//! Credential extraction from the WebSocket upgrade request.

/// The standard HTTP Authorization header name.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Query parameter accepted for clients that cannot set headers.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Extracts the bearer credential from an upgrade request.
///
/// Checks in order:
/// 1. `Authorization: Bearer <token>`
/// 2. `?token=<token>` in the request query
///
/// An `Authorization` value without the `Bearer` scheme is returned as-is so
/// that it fails verification rather than being treated as absent. Blank
/// values count as absent.
#[must_use]
pub fn extract_credential<'a>(
    authorization: Option<&'a str>,
    query: Option<&'a str>,
) -> Option<&'a str> {
    if let Some(auth) = authorization {
        let auth = auth.trim();
        let token = match auth.strip_prefix("Bearer") {
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim(),
            _ => auth,
        };
        if !token.is_empty() {
            return Some(token);
        }
    }

    query.and_then(token_from_query)
}

/// Finds the `token` parameter in a raw query string.
#[must_use]
pub fn token_from_query(query: &str) -> Option<&str> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == TOKEN_QUERY_PARAM)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}
