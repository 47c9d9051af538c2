// # Portal HTTP client
//
// Every session gets its own reqwest client so cookie jars are never shared
// between sources or runs.
//
// ## Error mapping
//
// - 401, 403: Authentication (session rejected)
// - 404: NotFound (endpoint absent on this portal)
// - 429, 5xx, transport failures: Network
// - An HTML login form where data was expected: Authentication

use ipfeed_core::config::PortalEndpoints;
use ipfeed_core::{Error, Result};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use std::time::Duration;

/// Browser-like agent; several portals refuse unknown clients
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Longest error body excerpt kept in error messages
const ERROR_EXCERPT_CHARS: usize = 200;

/// Build a client with an empty cookie jar
pub fn build_client(endpoints: &PortalEndpoints) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ko-KR,ko;q=0.9,en-US;q=0.8"));

    reqwest::Client::builder()
        .cookie_store(true)
        .timeout(Duration::from_secs(endpoints.request_timeout_secs))
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))
}

/// Map a non-success status to the pipeline's error kinds
pub fn status_error(status: StatusCode, context: &str, body: &str) -> Error {
    let excerpt: String = body.chars().take(ERROR_EXCERPT_CHARS).collect();
    match status.as_u16() {
        401 | 403 => Error::auth(format!("{} rejected the session: {}", context, status)),
        404 => Error::not_found(format!("{} not found: {}", context, status)),
        429 => Error::network(format!("{} rate limited: {}", context, status)),
        500..=599 => Error::network(format!("{} server error (transient): {} - {}", context, status, excerpt)),
        _ => Error::network(format!("{} failed: {} - {}", context, status, excerpt)),
    }
}

/// Read a response body as text after checking its status
///
/// # Returns
///
/// `(final_url, body)`; the final URL reflects redirects.
pub async fn read_text(response: reqwest::Response, context: &str) -> Result<(String, String)> {
    let status = response.status();
    let final_url = response.url().to_string();
    let body = response
        .text()
        .await
        .map_err(|e| Error::network(format!("{}: failed to read body: {}", context, e)))?;

    if !status.is_success() {
        return Err(status_error(status, context, &body));
    }
    Ok((final_url, body))
}

/// Whether a page is the portal's login form rather than data
///
/// Portals answer an expired session with a redirect to the login page and
/// a 200, so the status alone cannot tell.
pub fn is_login_page(final_url: &str, body: &str, endpoints: &PortalEndpoints) -> bool {
    let path = url::Url::parse(final_url)
        .map(|url| url.path().to_string())
        .unwrap_or_default();
    let on_login_path = !endpoints.login_page.is_empty()
        && (path == endpoints.login_page || path == endpoints.login_submit);

    let lowered = body.to_ascii_lowercase();
    let has_password_input =
        lowered.contains("type=\"password\"") || lowered.contains("type='password'");

    on_login_path || (has_password_input && lowered.contains(&endpoints.secret_field.to_ascii_lowercase()))
}

/// Fail with `Error::Authentication` when the portal bounced to its login page
pub fn ensure_not_login_page(final_url: &str, body: &str, endpoints: &PortalEndpoints) -> Result<()> {
    if is_login_page(final_url, body, endpoints) {
        return Err(Error::auth("Session expired: portal returned its login page"));
    }
    Ok(())
}
