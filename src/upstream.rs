//! Authenticated HTTP session against the archive host: login/logout
//! lifecycle, best-effort-serialised reauth on 401/403, and the archive
//! fetch itself.

use parking_lot::{Mutex, RwLock};
use reqwest::StatusCode;
use std::time::Duration;

const UPSTREAM_HOST: &str = "https://osu.ppy.sh";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("login form did not yield an xsrf token")]
    MissingXsrf,
    #[error("login rejected by upstream")]
    LoginRejected,
    #[error("heartbeat probe returned unexpected status {0}")]
    HeartbeatFailed(StatusCode),
}

/// The outcome of a `fetch` against the archive download endpoint.
pub enum FetchOutcome {
    /// 200 with a body and a `Location` header to parse the filename from.
    Ok { body: Vec<u8>, location: Option<String> },
    /// 401 or 403: the session's tokens are no longer accepted.
    Unauthorized,
    /// 404: the identifier does not exist upstream.
    NotFound,
    /// 429: upstream itself is rate-limiting this session.
    TooManyRequests,
    /// Any other status: treated as an unclassified upstream failure.
    Other(StatusCode),
}

#[derive(Default)]
struct Tokens {
    xsrf_token: String,
    session_token: String,
}

impl Tokens {
    fn valid(&self) -> bool {
        !self.xsrf_token.is_empty() && !self.session_token.is_empty()
    }
}

/// An authenticated session against the archive host.
///
/// Reads of the current tokens outside reauth are allowed to race with a
/// rotation in progress; a caller that observes a token about to be rotated
/// simply retries the request. Reauth itself is serialised by a best-effort
/// trylock: contending callers skip reauth rather than queue behind it, to
/// avoid a thundering herd under sustained auth failures.
pub struct UpstreamSession {
    client: reqwest::Client,
    username: String,
    password: String,
    tokens: RwLock<Tokens>,
    reauth_lock: Mutex<()>,
}

impl UpstreamSession {
    /// Builds a session for the given credentials. Does not contact upstream
    /// until `authorize` is called.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client configuration is valid");
        Self {
            client,
            username: username.into(),
            password: password.into(),
            tokens: RwLock::new(Tokens::default()),
            reauth_lock: Mutex::new(()),
        }
    }

    /// True once `authorize` has succeeded and tokens have not since been
    /// cleared.
    pub fn is_authorized(&self) -> bool {
        self.tokens.read().valid()
    }

    /// Seeds an XSRF cookie via a GET, then logs in via the session
    /// endpoint. On any non-success leaves the session unauthenticated.
    pub async fn authorize(&self) -> Result<(), UpstreamError> {
        let home = self
            .client
            .get(format!("{UPSTREAM_HOST}/home"))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?;
        let seed_xsrf = extract_cookie(&home, "XSRF-TOKEN").ok_or(UpstreamError::MissingXsrf)?;

        let response = self
            .client
            .post(format!("{UPSTREAM_HOST}/session"))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .form(&[
                ("_token", seed_xsrf.as_str()),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            *self.tokens.write() = Tokens::default();
            return Err(UpstreamError::LoginRejected);
        }

        let new_xsrf = extract_cookie(&response, "XSRF-TOKEN").unwrap_or(seed_xsrf);
        let session = extract_cookie(&response, "osu_session").ok_or(UpstreamError::LoginRejected)?;

        *self.tokens.write() = Tokens {
            xsrf_token: new_xsrf,
            session_token: session,
        };
        Ok(())
    }

    /// Invalidates the session upstream, then clears the local tokens
    /// regardless of the upstream outcome.
    pub async fn deauthorize(&self) {
        let (xsrf, session) = {
            let tokens = self.tokens.read();
            (tokens.xsrf_token.clone(), tokens.session_token.clone())
        };
        let _ = self
            .client
            .delete(format!("{UPSTREAM_HOST}/session"))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header("X-CSRF-Token", xsrf.clone())
            .header(
                reqwest::header::COOKIE,
                format!("XSRF-TOKEN={xsrf}; osu_session={session}"),
            )
            .send()
            .await;
        *self.tokens.write() = Tokens::default();
    }

    /// Fetches `/beatmapsets/<id>/download?noVideo=1` with the current
    /// tokens, a forged browser user-agent, and the beatmapset page as
    /// referer.
    pub async fn fetch(&self, id: i64) -> Result<FetchOutcome, UpstreamError> {
        let (xsrf, session) = {
            let tokens = self.tokens.read();
            (tokens.xsrf_token.clone(), tokens.session_token.clone())
        };
        let response = self
            .client
            .get(format!("{UPSTREAM_HOST}/beatmapsets/{id}/download?noVideo=1"))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::REFERER, format!("{UPSTREAM_HOST}/beatmapsets/{id}"))
            .header("X-CSRF-Token", xsrf.clone())
            .header(
                reqwest::header::COOKIE,
                format!("XSRF-TOKEN={xsrf}; osu_session={session}"),
            )
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                if let Some(new_xsrf) = extract_cookie(&response, "XSRF-TOKEN") {
                    self.refresh_xsrf(new_xsrf);
                }
                let body = response.bytes().await?.to_vec();
                Ok(FetchOutcome::Ok { body, location })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(FetchOutcome::Unauthorized),
            StatusCode::NOT_FOUND => Ok(FetchOutcome::NotFound),
            StatusCode::TOO_MANY_REQUESTS => Ok(FetchOutcome::TooManyRequests),
            other => Ok(FetchOutcome::Other(other)),
        }
    }

    /// Rotates the stored XSRF token if the new cookie belongs to the same
    /// domain. Only called after a successful fetch.
    fn refresh_xsrf(&self, new_xsrf: String) {
        let mut tokens = self.tokens.write();
        if tokens.valid() {
            tokens.xsrf_token = new_xsrf;
        }
    }

    /// Best-effort-serialised reauth: deauthorize then authorize under a
    /// trylock. Contending callers that fail to acquire the lock return
    /// immediately without retrying or waiting, so sustained auth failures
    /// don't pile every stalled request behind a single reauth cycle.
    pub async fn try_reauth(&self) -> bool {
        let Some(_guard) = self.reauth_lock.try_lock() else {
            return false;
        };
        self.deauthorize().await;
        self.authorize().await.is_ok()
    }

    /// Issues a benign fetch to keep tokens live. Tolerates 429/404/200;
    /// any other status is reported to the caller for a one-minute backoff
    /// retry.
    pub async fn heartbeat(&self, probe_id: i64) -> Result<(), UpstreamError> {
        match self.fetch(probe_id).await? {
            FetchOutcome::Ok { .. }
            | FetchOutcome::NotFound
            | FetchOutcome::TooManyRequests => Ok(()),
            FetchOutcome::Unauthorized => {
                self.try_reauth().await;
                Ok(())
            }
            FetchOutcome::Other(status) => Err(UpstreamError::HeartbeatFailed(status)),
        }
    }
}

fn extract_cookie(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            let (pair, _attrs) = cookie.split_once(';').unwrap_or((cookie, ""));
            let (key, value) = pair.split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_default_invalid() {
        let tokens = Tokens::default();
        assert!(!tokens.valid());
    }

    #[test]
    fn tokens_valid_when_both_present() {
        let tokens = Tokens {
            xsrf_token: "a".into(),
            session_token: "b".into(),
        };
        assert!(tokens.valid());
    }
}
