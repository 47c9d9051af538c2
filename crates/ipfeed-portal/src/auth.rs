// # Portal Authenticator
//
// Cookie-session login against a form-based portal.
//
// ## Handshake
//
// ```text
// Anonymous ──GET login page──▶ ProbeSent ──POST verify──▶ LoginSubmitted
//                                                              │
//                     Authenticated ◀──markers found── POST login form
//                                                              │
//                                  Failed ◀──still on login page
// ```
//
// The login page GET seeds the cookie jar (session id, CSRF cookie). The
// verify step is skipped for portals configured with an empty
// `verify_user` path.
//
// ## Security
//
// - The secret is sent in the form body only and never logged
// - Failed logins are not retried here; the scheduler's next run is the retry

use async_trait::async_trait;
use chrono::Duration;
use ipfeed_core::config::{Credential, PortalEndpoints, SourceConfig};
use ipfeed_core::traits::{Session, SessionAuthenticator};
use ipfeed_core::{Error, Result};
use tracing::{debug, info, warn};

use crate::client;

/// Where the handshake currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    ProbeSent,
    LoginSubmitted,
    Authenticated,
    Failed,
}

/// Reasons a login is refused
#[derive(Debug, thiserror::Error)]
pub enum LoginFailure {
    #[error("identity rejected by the verification step")]
    IdentityRejected,

    #[error("portal answered HTTP {0} during login")]
    Status(u16),

    #[error("portal returned to its login page")]
    StillOnLoginPage,
}

impl From<LoginFailure> for Error {
    fn from(failure: LoginFailure) -> Self {
        Error::auth(failure.to_string())
    }
}

/// Form-login authenticator for one portal
pub struct PortalAuthenticator {
    source: String,
    base_url: String,
    endpoints: PortalEndpoints,
}

impl PortalAuthenticator {
    pub fn new(source: impl Into<String>, base_url: impl Into<String>, endpoints: PortalEndpoints) -> Self {
        Self {
            source: source.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            endpoints,
        }
    }

    /// Authenticator for a configured source
    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.source, &config.base_url, config.portal.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn advance(&self, state: &mut AuthState, next: AuthState) {
        debug!("{}: login {:?} -> {:?}", self.source, state, next);
        *state = next;
    }

    async fn handshake(&self, http: &reqwest::Client, credential: &Credential, state: &mut AuthState) -> Result<()> {
        http.get(self.url(&self.endpoints.login_page))
            .send()
            .await
            .map_err(|e| Error::network(format!("Login page unreachable: {}", e)))?;
        self.advance(state, AuthState::ProbeSent);

        if !self.endpoints.verify_user.is_empty() {
            let response = http
                .post(self.url(&self.endpoints.verify_user))
                .form(&credential_fields(&self.endpoints, credential))
                .send()
                .await
                .map_err(|e| Error::network(format!("Identity verification failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(LoginFailure::Status(status.as_u16()).into());
            }
            let body = response.text().await.unwrap_or_default();
            if verification_rejected(&body) {
                return Err(LoginFailure::IdentityRejected.into());
            }
        }

        let response = http
            .post(self.url(&self.endpoints.login_submit))
            .form(&login_form(&self.endpoints, credential))
            .send()
            .await
            .map_err(|e| Error::network(format!("Login submission failed: {}", e)))?;
        self.advance(state, AuthState::LoginSubmitted);

        let status = response.status();
        if !status.is_success() {
            return Err(LoginFailure::Status(status.as_u16()).into());
        }
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| Error::network(format!("Failed to read login response: {}", e)))?;

        if !looks_authenticated(&final_url, &body, &self.endpoints) {
            return Err(LoginFailure::StillOnLoginPage.into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for PortalAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalAuthenticator")
            .field("source", &self.source)
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn credential_fields(endpoints: &PortalEndpoints, credential: &Credential) -> Vec<(String, String)> {
    vec![
        (endpoints.identity_field.clone(), credential.identity.clone()),
        (endpoints.secret_field.clone(), credential.secret.clone()),
    ]
}

/// Fields of the login form, static extras last
pub fn login_form(endpoints: &PortalEndpoints, credential: &Credential) -> Vec<(String, String)> {
    let mut form = credential_fields(endpoints, credential);
    form.extend(endpoints.extra_login_fields.iter().cloned());
    form
}

/// Whether the verify step answered with an explicit refusal
///
/// Portals answer either JSON (`{"result": false}`, `{"result": "fail"}`)
/// or a bare flag (`N`, `fail`). Anything else is treated as acceptance.
pub fn verification_rejected(body: &str) -> bool {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["result", "success", "valid"] {
            match &value[key] {
                serde_json::Value::Bool(ok) => return !ok,
                serde_json::Value::String(s) => return is_refusal(s),
                _ => {}
            }
        }
        return false;
    }
    is_refusal(trimmed)
}

fn is_refusal(flag: &str) -> bool {
    matches!(flag.to_ascii_lowercase().as_str(), "n" | "no" | "fail" | "false" | "error")
}

/// Whether the post-login page belongs to a signed-in user
///
/// Both must hold: the redirect chain ended away from the login paths, and
/// the page shows an authenticated-area marker (a logout link, typically).
pub fn looks_authenticated(final_url: &str, body: &str, endpoints: &PortalEndpoints) -> bool {
    let lowered = body.to_ascii_lowercase();
    let has_marker = endpoints
        .authenticated_markers
        .iter()
        .any(|marker| lowered.contains(&marker.to_ascii_lowercase()));
    has_marker && !client::is_login_page(final_url, body, endpoints)
}

#[async_trait]
impl SessionAuthenticator for PortalAuthenticator {
    async fn authenticate(&self, credential: &Credential) -> Result<Session> {
        let http = client::build_client(&self.endpoints)?;
        let mut state = AuthState::Anonymous;

        match self.handshake(&http, credential, &mut state).await {
            Ok(()) => {
                self.advance(&mut state, AuthState::Authenticated);
                info!("Logged in to {} as {}", self.source, credential.identity);
                let ttl = Duration::minutes(i64::try_from(self.endpoints.session_ttl_mins).unwrap_or(60));
                Ok(Session::new(&self.source, &self.base_url, http, ttl))
            }
            Err(e) => {
                let reached = state;
                self.advance(&mut state, AuthState::Failed);
                warn!("Login to {} failed after {:?}: {}", self.source, reached, e);
                Err(e)
            }
        }
    }

    async fn logout(&self, session: Session) {
        if self.endpoints.logout.is_empty() {
            return;
        }
        if !session.is_valid() {
            debug!("{}: session already dropped by the portal, skipping logout", self.source);
            return;
        }
        match session.client().get(session.url(&self.endpoints.logout)).send().await {
            Ok(response) => debug!("{}: logout answered {}", self.source, response.status()),
            Err(e) => debug!("{}: logout failed (ignored): {}", self.source, e),
        }
    }

    fn portal_name(&self) -> &str {
        &self.source
    }
}
