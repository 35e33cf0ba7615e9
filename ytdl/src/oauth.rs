//! OAuth 2.0 management for Google API authentication.
//!
//! This module encapsulates the browser-based consent flow (PKCE with a loopback redirect) and
//! token refresh. The session controller reaches it through [`BrowserConsent`], its
//! [`ConsentFlow`] implementation.

use crate::config::DEFAULT_TOKEN_ENDPOINT;
use crate::credential::AccountIdentity;
use crate::error::AuthChallenge;
use crate::session::{ConsentFlow, ConsentOutcome};
use bytes::Bytes;
use eyre::Context;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper::{Request, Response, body};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RevocationUrl, Scope, TokenResponse, TokenUrl, reqwest,
};
use std::future::Future;
use std::sync::Arc;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

const REVOCATION_URL: &str = "https://oauth2.googleapis.com/revoke";

/// Access to the user's YouTube account plus the basic profile shown next to the uploads.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/youtube",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/userinfo.email",
];

const OAUTH_DONE_HTML: &str = "<!DOCTYPE html>\
<html><head><title>ytdl</title></head>\
<body><h1>Signed in</h1><p>You can close this window and return to ytdl.</p></body></html>";

/// Manages OAuth 2.0 authentication flows for Google API access.
///
/// For an installed desktop application using PKCE the client secret is embedded in the
/// configuration and is _not_ considered secret.
#[derive(Debug, Clone)]
pub struct OAuthManager {
    client_id: String,
    client_secret: String,
    /// Token endpoint used for both initial authentication and token refresh
    token_url: String,
}

impl OAuthManager {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: DEFAULT_TOKEN_ENDPOINT.to_string(),
        }
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    fn token_url(&self) -> eyre::Result<TokenUrl> {
        TokenUrl::new(self.token_url.clone())
            .with_context(|| format!("parse token endpoint {}", self.token_url))
    }

    fn http_client() -> eyre::Result<reqwest::Client> {
        reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build OAuth HTTP client")
    }

    /// Performs a complete OAuth 2.0 authorization flow to obtain a new access token.
    ///
    /// Opens the user's browser on Google's consent page (pre-filled with `login_hint` when
    /// given), waits for the redirect on a local HTTP server, and exchanges the authorization
    /// code for a token.
    ///
    /// # Panics
    ///
    /// Panics if hardcoded OAuth endpoint URLs are malformed (this should never happen
    /// in practice as the URLs are static).
    pub async fn authenticate(
        &self,
        login_hint: Option<&AccountIdentity>,
    ) -> eyre::Result<BasicTokenResponse> {
        let csrf = CsrfToken::new_random();
        let (redirect_url, eventually_authorization_code) = self
            .setup_redirect(csrf.clone())
            .await
            .context("set up redirect endpoint")?;

        let auth_url =
            AuthUrl::new(AUTH_URL.to_string()).expect("Invalid authorization endpoint URL");
        let token_url = self.token_url()?;
        let revocation_url = RevocationUrl::new(REVOCATION_URL.to_string())
            .expect("Invalid revocation endpoint URL");
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url)
            .set_revocation_url(revocation_url);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let mut request = client
            // We never re-use the CSRF since we only go through the flow exactly once.
            .authorize_url(move || csrf.clone())
            .add_scopes(SCOPES.iter().map(|s| Scope::new(s.to_string())))
            .add_extra_param("access_type", "offline")
            .set_pkce_challenge(pkce_challenge);
        if let Some(account) = login_hint {
            request = request.add_extra_param("login_hint", account.as_str().to_string());
        }
        let (auth_url, _csrf_token) = request.url();

        tracing::info!(url = %auth_url, "asking user to follow OAuth flow");
        webbrowser::open(auth_url.as_ref()).context("open user's browser")?;
        let authorization_code = eventually_authorization_code
            .await
            .context("await user authorization code")?;

        let http_client = Self::http_client()?;
        let token_result = client
            .exchange_code(authorization_code)
            .set_pkce_verifier(pkce_verifier)
            .request_async(&http_client)
            .await
            .context("exchange authorization code with access token")?;

        Ok(token_result)
    }

    /// Attempts to refresh an existing OAuth token using its refresh token.
    ///
    /// * `Ok(Some(new_token))` - Refresh succeeded, new token is available
    /// * `Ok(None)` - The grant is no longer valid or there is no refresh token
    /// * `Err(_)` - Network or other error occurred during refresh attempt
    ///
    /// When refresh yields `None`, the user must go through [`Self::authenticate`] again.
    pub async fn refresh_token(
        &self,
        token: BasicTokenResponse,
    ) -> eyre::Result<Option<BasicTokenResponse>> {
        let Some(refresh_token) = token.refresh_token() else {
            tracing::warn!("no refresh token available, cannot refresh");
            return Ok(None);
        };

        tracing::debug!("attempting to refresh OAuth token");

        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(self.token_url()?);

        let http_client = Self::http_client()?;

        match client
            .exchange_refresh_token(refresh_token)
            .request_async(&http_client)
            .await
        {
            Ok(new_token) => {
                tracing::debug!("successfully refreshed OAuth token");
                Ok(Some(new_token))
            }
            Err(ref e @ oauth2::RequestTokenError::ServerResponse(ref sr))
                if matches!(
                    sr.error(),
                    oauth2::basic::BasicErrorResponseType::InvalidGrant
                ) =>
            {
                tracing::warn!("OAuth refresh token considered invalid grant: {}", e);
                Ok(None)
            }
            Err(e) => Err(e).context("exchange refresh token"),
        }
    }

    /// Sets up a one-shot local HTTP server to receive the OAuth authorization callback.
    ///
    /// Returns the redirect URL to hand to Google and a future that resolves to the
    /// authorization code once the browser comes back with a matching CSRF state.
    async fn setup_redirect(
        &self,
        csrf: CsrfToken,
    ) -> eyre::Result<(
        RedirectUrl,
        impl Future<Output = eyre::Result<AuthorizationCode>>,
    )> {
        let socket = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind to localhost")?;
        let addr = socket.local_addr().context("get local address")?;
        let url = RedirectUrl::new(format!("http://{}:{}", addr.ip(), addr.port()))
            .context("construct redirect url")?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let r = async move {
                let (conn, _) = socket.accept().await.context("accept")?;
                let conn = hyper_util::rt::TokioIo::new(conn);
                let (got, mut gotten) = tokio::sync::mpsc::channel(1);
                let service = service_fn(move |req: Request<body::Incoming>| {
                    let csrf = csrf.clone();
                    let got = got.clone();
                    async move {
                        let mut presented_state = None;
                        let mut presented_code = None;
                        let mut presented_error = None;
                        for (k, v) in
                            form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
                        {
                            match &*k {
                                "state" => presented_state = Some(v),
                                "code" => presented_code = Some(v),
                                "error" => presented_error = Some(v),
                                _ => {}
                            }
                        }
                        if presented_state.as_deref() != Some(csrf.secret().as_str()) {
                            return Err("invalid csrf token");
                        }
                        let result = match (presented_code, presented_error) {
                            (Some(code), _) => Ok(AuthorizationCode::new(code.into_owned())),
                            (None, Some(error)) => Err(error.into_owned()),
                            (None, None) => return Err("no authorization code found"),
                        };
                        if got.send(result).await.is_err() {
                            return Err("redirect server already finished");
                        }
                        Ok(Response::new(Full::<Bytes>::from(OAUTH_DONE_HTML)))
                    }
                });
                let mut serve = std::pin::pin!(
                    hyper::server::conn::http1::Builder::new().serve_connection(conn, service)
                );

                tokio::select! {
                    exit = &mut serve => {
                        if let Err(e) = exit {
                            Err(e).context("redirect server got bad request")
                        } else {
                            eyre::bail!("redirect server exit prematurely");
                        }
                    }
                    code = gotten.recv() => {
                        serve.as_mut().graceful_shutdown();
                        // let the success page reach the browser
                        let _ = serve.await;
                        match code {
                            Some(Ok(code)) => Ok(code),
                            Some(Err(error)) => eyre::bail!("user declined authorization: {error}"),
                            None => eyre::bail!("redirect service dropped"),
                        }
                    }
                }
            };
            let _ = tx.send(r.await);
        });
        Ok((url, async move {
            rx.await.context("redirect future dropped prematurely")?
        }))
    }
}

/// Consent flow that sends the user to Google's consent page in their browser.
#[derive(Debug, Clone)]
pub struct BrowserConsent {
    oauth: Arc<OAuthManager>,
}

impl BrowserConsent {
    pub fn new(oauth: Arc<OAuthManager>) -> Self {
        Self { oauth }
    }
}

impl ConsentFlow for BrowserConsent {
    async fn request_consent(
        &self,
        account: AccountIdentity,
        challenge: AuthChallenge,
    ) -> ConsentOutcome {
        tracing::info!(%account, %challenge, "starting browser consent flow");
        match self.oauth.authenticate(Some(&account)).await {
            Ok(token) => ConsentOutcome::Granted(token),
            Err(e) => {
                tracing::warn!(%account, error = %format!("{e:#}"), "consent flow did not complete");
                ConsentOutcome::Denied
            }
        }
    }
}
