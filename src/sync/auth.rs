//! Microsoft identity platform sign-in for the To Do push.
//!
//! Tokens are cached per account in a JSON file in the config directory. A
//! non-interactive push only uses the cache (refreshing an expired access
//! token when a refresh token is available). An interactive push runs the
//! device-code flow: the user opens a URL, types a short code, and the
//! resulting tokens are cached under the Graph user id.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use indexmap::IndexMap;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::graph::{GRAPH_BASE, truncate_body};
use crate::io::store::atomic_write;

pub const AUTHORITY: &str = "https://login.microsoftonline.com/common";
pub const SCOPES: &str = "Tasks.ReadWrite User.Read offline_access";
pub const TOKEN_CACHE_FILE: &str = "ms_token_cache.json";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
/// Access tokens this close to expiry are refreshed instead of used.
const EXPIRY_MARGIN_SECS: i64 = 60;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Microsoft Client ID is not configured.")]
    MissingClientId,
    #[error("No cached token. Run `tasker sync --interactive` to sign in.")]
    NotSignedIn,
    #[error("sign-in code expired before it was entered")]
    CodeExpired,
    #[error("sign-in failed: {0}")]
    Rejected(String),
    #[error("could not write token cache {path}: {source}")]
    Cache { path: PathBuf, source: io::Error },
    #[error("sign-in request failed: {0}")]
    Request(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Token cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAccount {
    #[serde(default)]
    pub username: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds
    pub expires_at: i64,
}

impl CachedAccount {
    pub fn is_fresh(&self, now: i64) -> bool {
        self.expires_at - EXPIRY_MARGIN_SECS > now
    }

    fn from_token(
        token: TokenResponse,
        username: Option<String>,
        previous_refresh: Option<String>,
        now: i64,
    ) -> Self {
        CachedAccount {
            username,
            access_token: token.access_token,
            // Refresh responses may omit a new refresh token
            refresh_token: token.refresh_token.or(previous_refresh),
            expires_at: now + token.expires_in,
        }
    }
}

/// Cached tokens keyed by account id, in sign-in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(default)]
    pub accounts: IndexMap<String, CachedAccount>,
}

impl TokenCache {
    /// Read the cache. A missing or unreadable file is an empty cache.
    pub fn load(path: &Path) -> TokenCache {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return TokenCache::default(),
            Err(e) => {
                log::warn!("could not read token cache {}: {}", path.display(), e);
                return TokenCache::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("ignoring malformed token cache {}: {}", path.display(), e);
            TokenCache::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), AuthError> {
        let cache_error = |source: io::Error| AuthError::Cache {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|e| cache_error(e.into()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(cache_error)?;
        }
        atomic_write(path, json.as_bytes()).map_err(cache_error)
    }

    /// The account with `account_id`, else the first cached account.
    pub fn select(&self, account_id: Option<&str>) -> Option<(&str, &CachedAccount)> {
        account_id
            .and_then(|id| self.accounts.get_key_value(id))
            .or_else(|| self.accounts.first())
            .map(|(id, account)| (id.as_str(), account))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenErrorResponse {
    fn describe(&self) -> String {
        match &self.error_description {
            // Descriptions carry trace ids on later lines
            Some(d) => d.lines().next().unwrap_or(&self.error).to_string(),
            None => self.error.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default = "default_poll_interval")]
    interval: u64,
    #[serde(default)]
    message: Option<String>,
}

fn default_poll_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct GraphUser {
    id: String,
    #[serde(rename = "userPrincipalName", default)]
    user_principal_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

/// A usable access token and the account it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIn {
    pub access_token: String,
    pub account_id: String,
}

pub struct Authenticator {
    http: Client,
    client_id: String,
    authority: String,
    cache_path: PathBuf,
}

impl Authenticator {
    pub fn new(client_id: &str, cache_path: &Path) -> Result<Self, AuthError> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(AuthError::MissingClientId);
        }
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Authenticator {
            http,
            client_id: client_id.to_string(),
            authority: AUTHORITY.to_string(),
            cache_path: cache_path.to_path_buf(),
        })
    }

    /// Get an access token, from the cache or by signing in.
    pub fn acquire(&self, account_id: Option<&str>, interactive: bool) -> Result<SignedIn, AuthError> {
        let mut cache = TokenCache::load(&self.cache_path);
        let now = Utc::now().timestamp();

        if interactive {
            let token = self.device_code_sign_in()?;
            let user = self.whoami(&token.access_token)?;
            log::info!(
                "signed in as {}",
                user.user_principal_name.as_deref().unwrap_or(&user.id)
            );
            let account = CachedAccount::from_token(token, user.user_principal_name, None, now);
            let signed_in = SignedIn {
                access_token: account.access_token.clone(),
                account_id: user.id.clone(),
            };
            cache.accounts.insert(user.id, account);
            cache.save(&self.cache_path)?;
            return Ok(signed_in);
        }

        let (id, account) = cache
            .select(account_id)
            .map(|(id, a)| (id.to_string(), a.clone()))
            .ok_or(AuthError::NotSignedIn)?;
        if account.is_fresh(now) {
            return Ok(SignedIn {
                access_token: account.access_token,
                account_id: id,
            });
        }

        let refresh_token = account.refresh_token.clone().ok_or(AuthError::NotSignedIn)?;
        log::debug!("refreshing access token for account {}", id);
        let token = match self.post_token(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("scope", SCOPES),
        ])? {
            Ok(token) => token,
            Err(e) if e.error == "invalid_grant" => {
                log::warn!("cached sign-in expired: {}", e.describe());
                return Err(AuthError::NotSignedIn);
            }
            Err(e) => return Err(AuthError::Rejected(e.describe())),
        };
        let refreshed = CachedAccount::from_token(token, account.username, Some(refresh_token), now);
        let signed_in = SignedIn {
            access_token: refreshed.access_token.clone(),
            account_id: id.clone(),
        };
        cache.accounts.insert(id, refreshed);
        cache.save(&self.cache_path)?;
        Ok(signed_in)
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/oauth2/v2.0/{}", self.authority, name)
    }

    /// POST to the token endpoint. The outer error is transport failure, the
    /// inner one an OAuth error answer.
    fn post_token(
        &self,
        form: &[(&str, &str)],
    ) -> Result<Result<TokenResponse, TokenErrorResponse>, AuthError> {
        let response = self.http.post(self.endpoint("token")).form(form).send()?;
        let status = response.status();
        let body = response.text()?;
        if status.is_success() {
            return serde_json::from_str(&body)
                .map(Ok)
                .map_err(|e| AuthError::Rejected(format!("malformed token response: {e}")));
        }
        match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(err) => Ok(Err(err)),
            Err(_) => Err(AuthError::Rejected(format!("{} {}", status, truncate_body(&body)))),
        }
    }

    fn device_code_sign_in(&self) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(self.endpoint("devicecode"))
            .form(&[("client_id", self.client_id.as_str()), ("scope", SCOPES)])
            .send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            let reason = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| e.describe())
                .unwrap_or_else(|_| format!("{} {}", status, truncate_body(&body)));
            return Err(AuthError::Rejected(reason));
        }
        let device: DeviceCodeResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::Rejected(format!("malformed device code response: {e}")))?;

        let prompt = device.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, open {} and enter the code {}",
                device.verification_uri, device.user_code
            )
        });
        eprintln!("{prompt}");
        log::info!("waiting for device-code sign-in");

        let deadline = Instant::now() + Duration::from_secs(device.expires_in);
        let mut interval = Duration::from_secs(device.interval.max(1));
        loop {
            if Instant::now() >= deadline {
                return Err(AuthError::CodeExpired);
            }
            thread::sleep(interval);
            match self.post_token(&[
                ("grant_type", DEVICE_CODE_GRANT),
                ("client_id", self.client_id.as_str()),
                ("device_code", device.device_code.as_str()),
            ])? {
                Ok(token) => return Ok(token),
                Err(e) if e.error == "authorization_pending" => {}
                Err(e) if e.error == "slow_down" => interval += Duration::from_secs(5),
                Err(e) if e.error == "expired_token" => return Err(AuthError::CodeExpired),
                Err(e) => return Err(AuthError::Rejected(e.describe())),
            }
        }
    }

    fn whoami(&self, access_token: &str) -> Result<GraphUser, AuthError> {
        let response = self
            .http
            .get(format!("{GRAPH_BASE}/me"))
            .bearer_auth(access_token)
            .send()?
            .error_for_status()?;
        Ok(response.json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn account(token: &str, expires_at: i64) -> CachedAccount {
        CachedAccount {
            username: Some("me@example.com".into()),
            access_token: token.into(),
            refresh_token: Some("refresh".into()),
            expires_at,
        }
    }

    #[test]
    fn test_freshness_margin() {
        let acct = account("a", 1_000);
        assert!(acct.is_fresh(900));
        assert!(!acct.is_fresh(940));
        assert!(!acct.is_fresh(2_000));
    }

    #[test]
    fn test_select_prefers_named_account() {
        let mut cache = TokenCache::default();
        cache.accounts.insert("first".into(), account("a", 0));
        cache.accounts.insert("second".into(), account("b", 0));

        assert_eq!(cache.select(Some("second")).map(|(id, _)| id), Some("second"));
        assert_eq!(cache.select(Some("gone")).map(|(id, _)| id), Some("first"));
        assert_eq!(cache.select(None).map(|(id, _)| id), Some("first"));
        assert!(TokenCache::default().select(None).is_none());
    }

    #[test]
    fn test_cache_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join(TOKEN_CACHE_FILE);
        let mut cache = TokenCache::default();
        cache.accounts.insert("id-1".into(), account("tok", 42));
        cache.save(&path).unwrap();

        assert_eq!(TokenCache::load(&path), cache);
    }

    #[test]
    fn test_cache_load_tolerates_garbage() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(TOKEN_CACHE_FILE);
        assert_eq!(TokenCache::load(&path), TokenCache::default());
        fs::write(&path, "{not json").unwrap();
        assert_eq!(TokenCache::load(&path), TokenCache::default());
    }

    #[test]
    fn test_refresh_keeps_previous_refresh_token() {
        let token = TokenResponse {
            access_token: "new".into(),
            expires_in: 3600,
            refresh_token: None,
        };
        let acct = CachedAccount::from_token(token, None, Some("old-refresh".into()), 100);
        assert_eq!(acct.refresh_token.as_deref(), Some("old-refresh"));
        assert_eq!(acct.expires_at, 3700);
    }

    #[test]
    fn test_error_description_first_line() {
        let err: TokenErrorResponse = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"AADSTS70000: bad grant\r\nTrace ID: 1"}"#,
        )
        .unwrap();
        assert_eq!(err.describe(), "AADSTS70000: bad grant");
        let bare: TokenErrorResponse = serde_json::from_str(r#"{"error":"slow_down"}"#).unwrap();
        assert_eq!(bare.describe(), "slow_down");
    }

    #[test]
    fn test_requires_client_id() {
        let tmp = TempDir::new().unwrap();
        let result = Authenticator::new("  ", &tmp.path().join(TOKEN_CACHE_FILE));
        assert!(matches!(result, Err(AuthError::MissingClientId)));
    }

    #[test]
    fn test_silent_without_cache_needs_sign_in() {
        let tmp = TempDir::new().unwrap();
        let auth = Authenticator::new("client", &tmp.path().join(TOKEN_CACHE_FILE)).unwrap();
        assert!(matches!(auth.acquire(None, false), Err(AuthError::NotSignedIn)));
    }

    #[test]
    fn test_silent_uses_fresh_cached_token() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(TOKEN_CACHE_FILE);
        let mut cache = TokenCache::default();
        cache
            .accounts
            .insert("id-1".into(), account("cached", Utc::now().timestamp() + 3600));
        cache.save(&path).unwrap();

        let auth = Authenticator::new("client", &path).unwrap();
        assert_eq!(
            auth.acquire(Some("id-1"), false).unwrap(),
            SignedIn {
                access_token: "cached".into(),
                account_id: "id-1".into(),
            }
        );
    }

    #[test]
    fn test_expired_without_refresh_token_needs_sign_in() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(TOKEN_CACHE_FILE);
        let mut cache = TokenCache::default();
        let mut stale = account("stale", 0);
        stale.refresh_token = None;
        cache.accounts.insert("id-1".into(), stale);
        cache.save(&path).unwrap();

        let auth = Authenticator::new("client", &path).unwrap();
        assert!(matches!(auth.acquire(None, false), Err(AuthError::NotSignedIn)));
    }
}
