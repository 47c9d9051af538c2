// # Session Authenticator Trait
//
// Defines the interface for logging in to an external portal.
//
// ## Protocol
//
// ```text
// Anonymous ─▶ ProbeSent ─▶ LoginSubmitted ─▶ Authenticated
//                  │               │
//                  └───────────────┴────────▶ Failed
// ```
//
// ## Ownership
//
// A `Session` belongs to exactly one collection run. It is not `Clone`;
// the run hands it back to `logout()` when it ends, whatever the outcome.
//
// ## Implementations
//
// - Portal (reqwest, cookie-based): `ipfeed-portal` crate

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::Credential;

/// Authenticated client handle for a single run
pub struct Session {
    id: Uuid,
    source: String,
    base_url: String,
    client: reqwest::Client,
    established_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    valid: bool,
}

impl Session {
    /// Wrap a client whose cookie jar already carries the login
    pub fn new(
        source: impl Into<String>,
        base_url: impl Into<String>,
        client: reqwest::Client,
        ttl: Duration,
    ) -> Self {
        let established_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            established_at,
            expires_at: established_at + ttl,
            valid: true,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The cookie-carrying HTTP client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Absolute URL for a portal path
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Mark the session unusable, e.g. after the portal bounced a request to
    /// its login page
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("base_url", &self.base_url)
            .field("expires_at", &self.expires_at)
            .field("valid", &self.valid)
            .finish()
    }
}

/// Trait for portal login implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe; one authenticator serves every run
/// of its source.
///
/// # Retries
///
/// Implementations must NOT retry a failed login. A failure surfaces as
/// `Error::Authentication` and the scheduler's next run is the retry.
#[async_trait]
pub trait SessionAuthenticator: Send + Sync {
    /// Perform the full login handshake
    ///
    /// # Returns
    ///
    /// - `Ok(Session)`: Authenticated session
    /// - `Err(Error::Authentication)`: Portal refused the login
    /// - `Err(Error::Network)`: Portal unreachable or timed out
    async fn authenticate(&self, credential: &Credential) -> crate::Result<Session>;

    /// Whether the session can still be used
    fn is_authenticated(&self, session: &Session) -> bool {
        session.is_valid() && !session.is_expired(Utc::now())
    }

    /// End the session on the portal side. Best effort; never fails.
    async fn logout(&self, session: Session);

    /// Return a usable session, logging in again if `session` is stale
    async fn refresh(&self, session: Session, credential: &Credential) -> crate::Result<Session> {
        if self.is_authenticated(&session) {
            return Ok(session);
        }
        self.logout(session).await;
        self.authenticate(credential).await
    }

    /// Name used in logs
    fn portal_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out sessions with a fixed lifetime and counts calls
    struct CountingAuthenticator {
        ttl: Duration,
        logins: AtomicUsize,
        logouts: AtomicUsize,
    }

    impl CountingAuthenticator {
        fn with_ttl(ttl: Duration) -> Self {
            Self {
                ttl,
                logins: AtomicUsize::new(0),
                logouts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SessionAuthenticator for CountingAuthenticator {
        async fn authenticate(&self, _credential: &Credential) -> crate::Result<Session> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(Session::new("portal", "https://portal.example.org", reqwest::Client::new(), self.ttl))
        }

        async fn logout(&self, _session: Session) {
            self.logouts.fetch_add(1, Ordering::SeqCst);
        }

        fn portal_name(&self) -> &str {
            "portal"
        }
    }

    fn credential() -> Credential {
        Credential::new("analyst", "hunter2")
    }

    #[test]
    fn url_joins_paths() {
        let session = Session::new(
            "portal",
            "https://portal.example.org/",
            reqwest::Client::new(),
            Duration::minutes(5),
        );

        assert_eq!(session.url("/login"), "https://portal.example.org/login");
        assert_eq!(session.url("api/v1"), "https://portal.example.org/api/v1");
        assert_eq!(session.url("https://other.example.org/x"), "https://other.example.org/x");
    }

    #[test]
    fn expiry_and_invalidation() {
        let mut session = Session::new(
            "portal",
            "https://portal.example.org",
            reqwest::Client::new(),
            Duration::minutes(5),
        );

        assert!(session.is_valid());
        assert!(!session.is_expired(Utc::now()));
        assert!(session.is_expired(Utc::now() + Duration::minutes(6)));

        session.invalidate();
        assert!(!session.is_valid());
    }

    #[tokio::test]
    async fn refresh_keeps_a_live_session() {
        let auth = CountingAuthenticator::with_ttl(Duration::minutes(60));
        let session = auth.authenticate(&credential()).await.unwrap();
        let id = session.id();
        assert!(auth.is_authenticated(&session));

        let refreshed = auth.refresh(session, &credential()).await.unwrap();

        assert_eq!(refreshed.id(), id);
        assert_eq!(auth.logins.load(Ordering::SeqCst), 1);
        assert_eq!(auth.logouts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_logs_in_again_after_expiry() {
        let auth = CountingAuthenticator::with_ttl(Duration::zero());
        let session = auth.authenticate(&credential()).await.unwrap();
        let id = session.id();
        assert!(!auth.is_authenticated(&session));

        let refreshed = auth.refresh(session, &credential()).await.unwrap();

        assert_ne!(refreshed.id(), id);
        assert_eq!(auth.logins.load(Ordering::SeqCst), 2);
        assert_eq!(auth.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_replaces_an_invalidated_session() {
        let auth = CountingAuthenticator::with_ttl(Duration::minutes(60));
        let mut session = auth.authenticate(&credential()).await.unwrap();
        session.invalidate();
        assert!(!auth.is_authenticated(&session));

        let refreshed = auth.refresh(session, &credential()).await.unwrap();

        assert!(auth.is_authenticated(&refreshed));
        assert_eq!(auth.logins.load(Ordering::SeqCst), 2);
        assert_eq!(auth.logouts.load(Ordering::SeqCst), 1);
    }
}
