//! Account identity, the credential derived from it, and where tokens are kept.

use crate::error::{AuthChallenge, FetchError};
use crate::oauth::OAuthManager;
use eyre::Context;
use oauth2::TokenResponse;
use oauth2::basic::BasicTokenResponse;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, broadcast};

/// The Google account the user picked, usually an email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountIdentity(String);

impl AccountIdentity {
    pub fn new(name: impl Into<String>) -> eyre::Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            eyre::bail!("account name must not be empty");
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccountIdentity {
    type Error = eyre::Report;

    fn try_from(name: String) -> eyre::Result<Self> {
        Self::new(name)
    }
}

impl From<AccountIdentity> for String {
    fn from(account: AccountIdentity) -> Self {
        account.0
    }
}

impl fmt::Display for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct TimeBoundAccessToken {
    token: BasicTokenResponse,
    /// When the current access token expires (with safety buffer)
    expires_at: SystemTime,
}

impl TimeBoundAccessToken {
    /// Wraps a token that must be refreshed before first use.
    ///
    /// Tokens read back from storage carry no issue time, so their `expires_in` cannot be
    /// trusted.
    pub fn expired(token: BasicTokenResponse) -> Self {
        Self {
            expires_at: SystemTime::UNIX_EPOCH,
            token,
        }
    }

    /// Wraps a token that was just issued.
    pub fn new(token: BasicTokenResponse) -> Self {
        Self {
            expires_at: Self::calculate_token_expiry(&token),
            token,
        }
    }

    pub fn raw_token(&self) -> &BasicTokenResponse {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    /// Forces a refresh before the next use.
    pub fn expire(&mut self) {
        self.expires_at = SystemTime::UNIX_EPOCH;
    }

    /// Refreshes this token, keeping the refresh token if the server does not send a new one.
    ///
    /// * `Ok(true)` - Token was successfully refreshed
    /// * `Ok(false)` - Refresh failed (invalid grant, no refresh token, etc.)
    /// * `Err(_)` - Network or other error occurred
    pub async fn refresh(&mut self, oauth_manager: &OAuthManager) -> eyre::Result<bool> {
        tracing::trace!("refreshing token");
        match oauth_manager
            .refresh_token(self.token.clone())
            .await
            .context("refresh OAuth token")?
        {
            Some(new_token) => {
                let old_token = std::mem::replace(&mut self.token, new_token);
                if self.token.refresh_token().is_none() {
                    tracing::trace!("new token lacks refresh token, preserving original");
                    self.token
                        .set_refresh_token(old_token.refresh_token().cloned());
                }
                self.expires_at = Self::calculate_token_expiry(&self.token);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// `expires_in` minus a 5 minute buffer, or 55 minutes if the server gave no lifetime.
    fn calculate_token_expiry(token: &BasicTokenResponse) -> SystemTime {
        let now = SystemTime::now();
        if let Some(expires_in) = token.expires_in() {
            now + expires_in.saturating_sub(Duration::from_secs(300))
        } else {
            now + Duration::from_secs(3300)
        }
    }
}

/// Authorization attached to every remote call made on behalf of one account.
///
/// Cloning is cheap and clones share the token, so a fetch that cloned the credential at its
/// start keeps using exactly that token for all of its calls. The session controller builds a
/// new credential (rather than mutating this one) when the account changes, when a revocation
/// arrives, or after the user grants consent.
#[derive(Debug, Clone)]
pub struct Credential {
    account: AccountIdentity,
    generation: u64,
    token: Arc<Mutex<Option<TimeBoundAccessToken>>>,
    oauth: Option<Arc<OAuthManager>>,
    store: Option<Arc<dyn TokenStore>>,
}

impl Credential {
    pub fn new(
        account: AccountIdentity,
        generation: u64,
        token: Option<TimeBoundAccessToken>,
        oauth: Option<Arc<OAuthManager>>,
        store: Option<Arc<dyn TokenStore>>,
    ) -> Self {
        Self {
            account,
            generation,
            token: Arc::new(Mutex::new(token)),
            oauth,
            store,
        }
    }

    /// A credential around a fixed, freshly issued token that is never refreshed.
    pub fn with_token(
        account: AccountIdentity,
        generation: u64,
        token: BasicTokenResponse,
    ) -> Self {
        Self::new(
            account,
            generation,
            Some(TimeBoundAccessToken::new(token)),
            None,
            None,
        )
    }

    pub fn account(&self) -> &AccountIdentity {
        &self.account
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns a usable bearer token, refreshing it first if it has expired.
    ///
    /// A missing token or a refresh the server refuses is a [`FetchError::RecoverableAuth`];
    /// the user has to go through the consent flow again.
    #[tracing::instrument(skip(self), fields(account = %self.account, generation = self.generation))]
    pub async fn access_token(&self) -> Result<String, FetchError> {
        let mut slot = self.token.lock().await;
        let Some(token) = slot.as_mut() else {
            return Err(FetchError::RecoverableAuth(AuthChallenge::ConsentRequired));
        };

        if token.is_expired() {
            let Some(oauth) = &self.oauth else {
                return Err(FetchError::RecoverableAuth(AuthChallenge::Reauthorize));
            };
            tracing::debug!("access token expired, attempting refresh");
            match token.refresh(oauth).await {
                Ok(true) => {
                    if let Some(store) = &self.store
                        && let Err(e) = store.save(&self.account, token.raw_token())
                    {
                        tracing::warn!(error = %e, "failed to persist refreshed token");
                    }
                }
                Ok(false) => {
                    tracing::warn!("access token refresh refused, consent needed again");
                    *slot = None;
                    return Err(FetchError::RecoverableAuth(AuthChallenge::Reauthorize));
                }
                Err(e) => return Err(FetchError::Transient(e)),
            }
        }

        Ok(token.raw_token().access_token().secret().to_string())
    }

    /// Reacts to the server rejecting `rejected` with a 401.
    ///
    /// Returns `true` if the call is worth repeating: either another call already replaced the
    /// token, or the token can be refreshed and has been marked expired so the next
    /// [`Self::access_token`] refreshes it.
    pub async fn expire_rejected(&self, rejected: &str) -> bool {
        if self.oauth.is_none() {
            return false;
        }
        let mut slot = self.token.lock().await;
        let Some(token) = slot.as_mut() else {
            return false;
        };
        if token.raw_token().access_token().secret() != rejected {
            return true;
        }
        if token.raw_token().refresh_token().is_none() {
            return false;
        }
        tracing::debug!(account = %self.account, "access token rejected, forcing refresh");
        token.expire();
        true
    }
}

/// Where granted tokens are kept between runs, keyed by account.
pub trait TokenStore: fmt::Debug + Send + Sync {
    fn load(&self, account: &AccountIdentity) -> eyre::Result<Option<BasicTokenResponse>>;
    fn save(&self, account: &AccountIdentity, token: &BasicTokenResponse) -> eyre::Result<()>;
    fn remove(&self, account: &AccountIdentity) -> eyre::Result<()>;
}

/// Tokens kept as JSON in `<data dir>/tokens.json`.
#[derive(Debug)]
pub struct JsonTokenStore {
    path: PathBuf,
    // serializes read-modify-write cycles on the file
    lock: std::sync::Mutex<()>,
}

impl JsonTokenStore {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("tokens.json"),
            lock: std::sync::Mutex::new(()),
        }
    }

    fn read(&self) -> eyre::Result<BTreeMap<String, BasicTokenResponse>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read tokens from {}", self.path.display()))?;
        serde_json::from_str(&content).context("parse stored OAuth tokens")
    }

    fn write(&self, tokens: &BTreeMap<String, BasicTokenResponse>) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create token directory {}", parent.display()))?;
        }
        let json = serde_json::to_string(tokens).context("serialize OAuth tokens")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("write tokens to {}", self.path.display()))
    }

    fn update(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, BasicTokenResponse>),
    ) -> eyre::Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| eyre::eyre!("token store lock poisoned"))?;
        let mut tokens = self.read()?;
        f(&mut tokens);
        self.write(&tokens)
    }
}

impl TokenStore for JsonTokenStore {
    fn load(&self, account: &AccountIdentity) -> eyre::Result<Option<BasicTokenResponse>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| eyre::eyre!("token store lock poisoned"))?;
        Ok(self.read()?.remove(account.as_str()))
    }

    fn save(&self, account: &AccountIdentity, token: &BasicTokenResponse) -> eyre::Result<()> {
        self.update(|tokens| {
            tokens.insert(account.as_str().to_string(), token.clone());
        })
    }

    fn remove(&self, account: &AccountIdentity) -> eyre::Result<()> {
        self.update(|tokens| {
            tokens.remove(account.as_str());
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: std::sync::Mutex<HashMap<AccountIdentity, BasicTokenResponse>>,
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, account: &AccountIdentity) -> eyre::Result<Option<BasicTokenResponse>> {
        let tokens = self
            .tokens
            .lock()
            .map_err(|_| eyre::eyre!("token store lock poisoned"))?;
        Ok(tokens.get(account).cloned())
    }

    fn save(&self, account: &AccountIdentity, token: &BasicTokenResponse) -> eyre::Result<()> {
        self.tokens
            .lock()
            .map_err(|_| eyre::eyre!("token store lock poisoned"))?
            .insert(account.clone(), token.clone());
        Ok(())
    }

    fn remove(&self, account: &AccountIdentity) -> eyre::Result<()> {
        self.tokens
            .lock()
            .map_err(|_| eyre::eyre!("token store lock poisoned"))?
            .remove(account);
        Ok(())
    }
}

/// Source of "this account's token is no longer valid" signals.
///
/// Anything that learns about a revocation (a failed upload, an admin action, another window)
/// calls [`Revocations::revoke`]; every session that subscribed hears about it.
#[derive(Debug, Clone)]
pub struct Revocations {
    tx: broadcast::Sender<AccountIdentity>,
}

impl Default for Revocations {
    fn default() -> Self {
        Self::new()
    }
}

impl Revocations {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn revoke(&self, account: &AccountIdentity) {
        // nobody listening is fine
        let _ = self.tx.send(account.clone());
    }

    pub fn subscribe(&self) -> RevocationSubscription {
        RevocationSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug)]
pub struct RevocationSubscription {
    rx: broadcast::Receiver<AccountIdentity>,
}

impl RevocationSubscription {
    /// Waits for the next revocation; `None` once every [`Revocations`] handle is gone.
    pub async fn recv(&mut self) -> Option<AccountIdentity> {
        loop {
            match self.rx.recv().await {
                Ok(account) => return Some(account),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "missed revocation signals");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn token_response(access_token: &str) -> BasicTokenResponse {
    BasicTokenResponse::new(
        oauth2::AccessToken::new(access_token.to_string()),
        oauth2::basic::BasicTokenType::Bearer,
        oauth2::EmptyExtraTokenFields {},
    )
}
