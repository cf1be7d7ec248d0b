//! Cookie-carried session with a signed session ID.

use tracing::debug;
use webflo_core::IdGenerator;
use webflo_settings::SessionSettings;

use super::signing::SessionSigner;
use crate::cookies::{Cookie, CookieJar};
use crate::errors::Result;
use crate::headers::Headers;

/// Session cookie parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Name of the session ID cookie.
    pub cookie_name: String,
    /// HMAC secret; IDs are signed when set.
    pub secret: Option<String>,
    /// `Max-Age` of the session cookie, in seconds.
    pub ttl_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "__sessid".to_owned(),
            secret: None,
            ttl_secs: None,
        }
    }
}

impl SessionConfig {
    /// Build from the `session` settings section.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            cookie_name: settings.cookie_name.clone(),
            secret: settings.secret.clone(),
            ttl_secs: settings.ttl_secs,
        }
    }
}

/// A session whose ID and values travel as cookies.
#[derive(Debug)]
pub struct HttpCookieSession {
    id: String,
    is_new: bool,
    config: SessionConfig,
    jar: CookieJar,
}

impl HttpCookieSession {
    /// Resolve the session of a request.
    ///
    /// A presented ID is kept only if it passes validation: with a secret it
    /// must be `rand.signature` with a matching HMAC; without one it must
    /// not be dotted. Otherwise a fresh ID is minted.
    pub fn open(headers: &dyn Headers, config: SessionConfig, ids: &dyn IdGenerator) -> Result<Self> {
        let signer = config.secret.as_deref().map(SessionSigner::new).transpose()?;
        let mut jar = CookieJar::from_headers(headers);
        let presented = jar.take_initial(&config.cookie_name);

        let accepted = presented.filter(|id| {
            let valid = match &signer {
                Some(signer) => signer.verify(id),
                None => !id.is_empty() && !id.contains('.'),
            };
            if !valid {
                debug!(cookie = %config.cookie_name, "rejecting presented session id");
            }
            valid
        });

        let (id, is_new) = match accepted {
            Some(id) => (id, false),
            None => {
                let id = match &signer {
                    Some(signer) => signer.fresh_id(),
                    None => ids.generate(),
                };
                (id, true)
            }
        };

        Ok(Self {
            id,
            is_new,
            config,
            jar,
        })
    }

    /// Resolved session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the ID was minted for this request.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Session value under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.jar.get(key)
    }

    /// Set a plain session value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.jar.set(Cookie::new(key, value));
    }

    /// Set a value with its own cookie attributes.
    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.jar.set(cookie);
    }

    /// Remove a value. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.jar.delete(key)
    }

    /// Keys of the live values.
    pub fn keys(&self) -> Vec<String> {
        self.jar.names()
    }

    /// The session ID cookie as it will be sent.
    pub fn id_cookie(&self) -> Cookie {
        let cookie = Cookie::new(self.config.cookie_name.as_str(), self.id.as_str())
            .path("/")
            .secure(true)
            .http_only(true)
            .same_site("Lax");
        match self.config.ttl_secs.and_then(|ttl| i64::try_from(ttl).ok()) {
            Some(ttl) => cookie.max_age(ttl),
            None => cookie,
        }
    }

    /// Write the session ID cookie (unless the response already sets one)
    /// and the value diff into `headers`.
    pub fn commit(&mut self, headers: &mut dyn Headers) {
        if !headers.has_set_cookie(&self.config.cookie_name) {
            headers.append("set-cookie", self.id_cookie().to_string());
        }
        let _ = self.jar.commit(headers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::SimpleHeaders;
    use webflo_core::SequentialIds;

    fn signed() -> SessionConfig {
        SessionConfig {
            secret: Some("S".into()),
            ..SessionConfig::default()
        }
    }

    fn request(cookie: &str) -> SimpleHeaders {
        SimpleHeaders::new().with("cookie", cookie)
    }

    #[test]
    fn valid_signed_id_is_kept() {
        let signer = SessionSigner::new("S").unwrap();
        let id = signer.signed_id("abc");
        let session = HttpCookieSession::open(
            &request(&format!("__sessid={id}")),
            signed(),
            &SequentialIds::new("s"),
        )
        .unwrap();
        assert_eq!(session.id(), id);
        assert!(!session.is_new());
    }

    #[test]
    fn tampered_signature_forces_new_signed_id() {
        let signer = SessionSigner::new("S").unwrap();
        let mut id = signer.signed_id("abc");
        let last = id.pop().unwrap();
        id.push(if last == '0' { '1' } else { '0' });

        let session =
            HttpCookieSession::open(&request(&format!("__sessid={id}")), signed(), &SequentialIds::new("s"))
                .unwrap();
        assert_ne!(session.id(), id);
        assert!(session.is_new());
        assert!(signer.verify(session.id()));
    }

    #[test]
    fn unsigned_id_is_rejected_when_secret_set() {
        let session =
            HttpCookieSession::open(&request("__sessid=plain"), signed(), &SequentialIds::new("s")).unwrap();
        assert!(session.is_new());
    }

    #[test]
    fn rejection_is_logged() {
        let (logs, _guard) = webflo_core::logging::capture_logs();
        let _ = HttpCookieSession::open(&request("__sessid=plain"), signed(), &SequentialIds::new("s")).unwrap();
        assert!(logs.has_event(tracing::Level::DEBUG, "rejecting presented session id"));
        assert!(logs.has_field("cookie", "__sessid"));
    }

    #[test]
    fn dotted_id_is_rejected_without_secret() {
        let ids = SequentialIds::new("s");
        let session =
            HttpCookieSession::open(&request("__sessid=abc.def"), SessionConfig::default(), &ids).unwrap();
        assert_eq!(session.id(), "s-1");

        let kept =
            HttpCookieSession::open(&request("__sessid=plain"), SessionConfig::default(), &ids).unwrap();
        assert_eq!(kept.id(), "plain");
        assert!(!kept.is_new());
    }

    #[test]
    fn commit_appends_session_cookie_with_ttl() {
        let config = SessionConfig {
            ttl_secs: Some(600),
            ..SessionConfig::default()
        };
        let mut session =
            HttpCookieSession::open(&SimpleHeaders::new(), config, &SequentialIds::new("s")).unwrap();
        let mut response = SimpleHeaders::new();
        session.commit(&mut response);
        assert_eq!(
            response.get_all("set-cookie"),
            vec!["__sessid=s-1; Path=/; Secure; HttpOnly; SameSite=Lax; Max-Age=600"]
        );
    }

    #[test]
    fn commit_respects_existing_session_set_cookie() {
        let mut session =
            HttpCookieSession::open(&SimpleHeaders::new(), SessionConfig::default(), &SequentialIds::new("s"))
                .unwrap();
        let mut response = SimpleHeaders::new().with("Set-Cookie", "__sessid=override");
        session.commit(&mut response);
        assert_eq!(response.get_all("set-cookie"), vec!["__sessid=override"]);
    }

    #[test]
    fn value_changes_follow_the_session_cookie() {
        let mut session = HttpCookieSession::open(
            &request("__sessid=sid; cart=3; seen=1"),
            SessionConfig::default(),
            &SequentialIds::new("s"),
        )
        .unwrap();
        assert_eq!(session.get("cart"), Some("3"));
        assert_eq!(session.keys(), vec!["cart".to_string(), "seen".to_string()]);

        session.set("cart", "4");
        assert!(session.delete("seen"));

        let mut response = SimpleHeaders::new();
        session.commit(&mut response);
        assert_eq!(
            response.get_all("set-cookie"),
            vec![
                "__sessid=sid; Path=/; Secure; HttpOnly; SameSite=Lax",
                "cart=4",
                "seen=; Max-Age=0",
            ]
        );

        let mut again = SimpleHeaders::new().with("set-cookie", "__sessid=sid");
        session.commit(&mut again);
        assert_eq!(again.get_all("set-cookie").len(), 1);
    }
}
