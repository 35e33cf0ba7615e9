//! HTTP client for the YouTube Data API v3 and the People API.

use crate::backoff::BackoffPolicy;
use crate::config::{Config, Endpoints};
use crate::credential::Credential;
use crate::error::{FetchError, classify_status};
use crate::youtube_api::{
    channels::ChannelListResponse, people::Person, playlist_items::PlaylistItemListResponse,
    types::ApiErrorResponse, videos::VideoListResponse,
};
use eyre::Context;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::instrument;

/// Client for the Google APIs the uploads view needs.
///
/// The client holds no authorization of its own. Every call takes the [`Credential`] it should
/// act on behalf of, so one client can serve any number of accounts and a call always finishes
/// with the credential it started with.
///
/// Transient failures are retried according to the configured [`BackoffPolicy`]; anything else
/// is returned to the caller right away.
#[derive(Debug, Clone)]
pub struct YouTubeClient {
    client: reqwest::Client,
    endpoints: Endpoints,
    /// Simple API key attached to every request as `key=`.
    api_key: String,
    backoff: BackoffPolicy,
}

impl YouTubeClient {
    pub fn new(
        client: reqwest::Client,
        endpoints: Endpoints,
        api_key: impl Into<String>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            client,
            endpoints,
            api_key: api_key.into(),
            backoff,
        }
    }

    /// Builds a client with its own HTTP connection pool from the application config.
    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .user_agent(format!(
                "{}/{}",
                config.app_name,
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(30))
            .build()
            .context("build Google API HTTP client")?;
        Ok(Self::new(
            client,
            config.endpoints.clone(),
            config.api_key.clone(),
            config.backoff.clone(),
        ))
    }

    fn youtube_url(&self, resource: &str) -> String {
        format!("{}/{resource}", self.endpoints.youtube.trim_end_matches('/'))
    }

    fn people_url(&self, resource: &str) -> String {
        format!("{}/{resource}", self.endpoints.people.trim_end_matches('/'))
    }

    /// Makes one authenticated GET request and maps a non-2xx answer onto [`FetchError`].
    ///
    /// A 401 is answered by refreshing the token once and repeating the request; only if that
    /// is not possible (or is rejected too) does the caller see it. The error body is decoded
    /// when possible so that 403s can be told apart by their reason (quota vs. missing
    /// scopes).
    #[instrument(skip(self, credential), fields(account = %credential.account()), level = tracing::Level::TRACE)]
    async fn make_authenticated_request(
        &self,
        credential: &Credential,
        url: &str,
        query_params: &[(&str, &str)],
    ) -> Result<reqwest::Response, FetchError> {
        let mut refreshed = false;
        let response = loop {
            let access_token = credential.access_token().await?;

            let mut request = self
                .client
                .get(url)
                .bearer_auth(&access_token)
                .query(query_params);
            if !self.api_key.is_empty() {
                request = request.query(&[("key", self.api_key.as_str())]);
            }

            let response = request.send().await?;
            if response.status() == http::StatusCode::UNAUTHORIZED
                && !refreshed
                && credential.expire_rejected(&access_token).await
            {
                refreshed = true;
                continue;
            }
            break response;
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let (reasons, message) = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(body) => (body.error.reasons(), body.error.message),
            Err(_) => (Vec::new(), body),
        };
        let error = classify_status(status, &reasons, &message);
        tracing::debug!(%status, ?reasons, %error, "Google API request failed");
        Err(error)
    }

    /// GETs `url` and decodes the JSON answer, retrying transient failures.
    async fn get_json<T: DeserializeOwned>(
        &self,
        what: &str,
        credential: &Credential,
        url: &str,
        query_params: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        self.backoff
            .retry(what, move || async move {
                let response = self
                    .make_authenticated_request(credential, url, query_params)
                    .await?;
                Ok(response.json::<T>().await?)
            })
            .await
    }

    /// Lists the channels owned by the signed-in user, with their related playlists.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/channels/list>
    #[instrument(skip(self, credential), fields(account = %credential.account()))]
    pub async fn list_my_channels(
        &self,
        credential: &Credential,
    ) -> Result<ChannelListResponse, FetchError> {
        let url = self.youtube_url("channels");
        self.get_json(
            "channels.list",
            credential,
            &url,
            &[("part", "contentDetails"), ("mine", "true")],
        )
        .await
    }

    /// Lists up to `max_results` items of a playlist (first page only).
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/playlistItems/list>
    #[instrument(skip(self, credential), fields(account = %credential.account()))]
    pub async fn list_playlist_items(
        &self,
        credential: &Credential,
        playlist_id: &str,
        max_results: u32,
    ) -> Result<PlaylistItemListResponse, FetchError> {
        let url = self.youtube_url("playlistItems");
        let max_results = max_results.to_string();
        self.get_json(
            "playlistItems.list",
            credential,
            &url,
            &[
                ("part", "id,contentDetails"),
                ("playlistId", playlist_id),
                ("maxResults", &max_results),
            ],
        )
        .await
    }

    /// Looks up the snippet and status of the given videos in one batched call.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/videos/list>
    #[instrument(skip(self, credential, video_ids), fields(account = %credential.account(), count = video_ids.len()))]
    pub async fn list_videos(
        &self,
        credential: &Credential,
        video_ids: &[&str],
    ) -> Result<VideoListResponse, FetchError> {
        let url = self.youtube_url("videos");
        let ids = video_ids.join(",");
        self.get_json(
            "videos.list",
            credential,
            &url,
            &[("part", "id,snippet,status"), ("id", &ids)],
        )
        .await
    }

    /// Fetches the signed-in user's own name, email address and photo.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/people/api/rest/v1/people/get>
    #[instrument(skip(self, credential), fields(account = %credential.account()))]
    pub async fn get_my_profile(&self, credential: &Credential) -> Result<Person, FetchError> {
        let url = self.people_url("people/me");
        self.get_json(
            "people.get",
            credential,
            &url,
            &[("personFields", "names,emailAddresses,photos")],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{AccountIdentity, TimeBoundAccessToken, token_response};
    use crate::error::AuthChallenge;
    use crate::mock::MockGoogleApi;
    use crate::oauth::OAuthManager;
    use std::sync::Arc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn credential() -> Credential {
        Credential::with_token(
            AccountIdentity::new("alice@example.com").unwrap(),
            1,
            token_response("test-token"),
        )
    }

    fn fast_backoff(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            initial_interval_ms: 1,
            multiplier: 1.0,
            max_interval_ms: 1,
            max_attempts,
        }
    }

    async fn client_for(api: &MockGoogleApi, max_attempts: u32) -> YouTubeClient {
        let base = api.start().await.unwrap();
        YouTubeClient::new(
            reqwest::Client::new(),
            Endpoints {
                youtube: base.clone(),
                people: base,
                ..Endpoints::default()
            },
            "api-key",
            fast_backoff(max_attempts),
        )
    }

    fn api_error(code: u16, reason: &str) -> serde_json::Value {
        json!({
            "error": {
                "code": code,
                "message": format!("{reason} happened"),
                "errors": [{ "domain": "youtube", "reason": reason, "message": "" }]
            }
        })
    }

    #[tokio::test]
    async fn sends_key_token_and_parts() {
        let api = MockGoogleApi::new();
        api.respond(
            "/channels",
            200,
            json!({
                "kind": "youtube#channelListResponse",
                "items": [{ "id": "UC1", "contentDetails": { "relatedPlaylists": { "uploads": "UU1" } } }]
            }),
        );
        let client = client_for(&api, 1).await;

        let channels = client.list_my_channels(&credential()).await.unwrap();
        assert_eq!(channels.uploads_playlist(), Some("UU1"));

        let requests = api.requests_to("/channels");
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.authorization.as_deref(), Some("Bearer test-token"));
        assert_eq!(request.query["key"], "api-key");
        assert_eq!(request.query["part"], "contentDetails");
        assert_eq!(request.query["mine"], "true");
    }

    #[tokio::test]
    async fn videos_are_looked_up_in_one_batch() {
        let api = MockGoogleApi::new();
        api.respond("/videos", 200, json!({ "items": [] }));
        let client = client_for(&api, 1).await;

        client
            .list_videos(&credential(), &["a", "b", "c"])
            .await
            .unwrap();

        let requests = api.requests_to("/videos");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].query["id"], "a,b,c");
        assert_eq!(requests[0].query["part"], "id,snippet,status");
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let api = MockGoogleApi::new();
        api.respond("/playlistItems", 503, api_error(503, "backendError"))
            .respond("/playlistItems", 200, json!({ "items": [] }));
        let client = client_for(&api, 3).await;

        let items = client
            .list_playlist_items(&credential(), "UU1", 20)
            .await
            .unwrap();
        assert!(items.items.is_empty());

        let requests = api.requests_to("/playlistItems");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].query["maxResults"], "20");
        assert_eq!(requests[0].query["playlistId"], "UU1");
    }

    #[tokio::test]
    async fn quota_errors_give_up_as_transient() {
        let api = MockGoogleApi::new();
        api.respond("/channels", 403, api_error(403, "quotaExceeded"));
        let client = client_for(&api, 3).await;

        let err = client.list_my_channels(&credential()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(api.requests_to("/channels").len(), 3);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let api = MockGoogleApi::new();
        api.respond("/channels", 401, api_error(401, "authError"));
        let client = client_for(&api, 5).await;

        let err = client.list_my_channels(&credential()).await.unwrap_err();
        assert_eq!(err.auth_challenge(), Some(AuthChallenge::Reauthorize));
        assert_eq!(api.requests_to("/channels").len(), 1);
    }

    #[tokio::test]
    async fn rejected_token_is_refreshed_once_and_retried() {
        let api = MockGoogleApi::new();
        api.respond("/channels", 401, api_error(401, "authError"))
            .respond("/channels", 200, json!({ "items": [] }));
        api.respond(
            "/token",
            200,
            json!({ "access_token": "fresh-token", "token_type": "Bearer", "expires_in": 3600 }),
        );
        let client = client_for(&api, 5).await;
        let base = client.endpoints.youtube.clone();

        let mut token = token_response("stale-token");
        token.set_refresh_token(Some(oauth2::RefreshToken::new("refresh".to_string())));
        let oauth = OAuthManager::new("cid", "secret").with_token_url(format!("{base}/token"));
        let credential = Credential::new(
            AccountIdentity::new("alice@example.com").unwrap(),
            1,
            Some(TimeBoundAccessToken::new(token)),
            Some(Arc::new(oauth)),
            None,
        );

        client.list_my_channels(&credential).await.unwrap();

        let requests = api.requests_to("/channels");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer stale-token"));
        assert_eq!(requests[1].authorization.as_deref(), Some("Bearer fresh-token"));
        assert_eq!(api.requests_to("/token").len(), 1);
    }

    #[tokio::test]
    async fn insufficient_scope_needs_consent() {
        let api = MockGoogleApi::new();
        api.respond(
            "/people/me",
            403,
            json!({
                "error": {
                    "code": 403,
                    "message": "Request had insufficient authentication scopes.",
                    "status": "PERMISSION_DENIED",
                    "details": [{ "@type": "type.googleapis.com/google.rpc.ErrorInfo", "reason": "ACCESS_TOKEN_SCOPE_INSUFFICIENT" }]
                }
            }),
        );
        let client = client_for(&api, 5).await;

        let err = client.get_my_profile(&credential()).await.unwrap_err();
        assert_eq!(err.auth_challenge(), Some(AuthChallenge::ConsentRequired));
        assert_eq!(api.requests_to("/people/me").len(), 1);
    }

    #[tokio::test]
    async fn undecodable_body_is_permanent() {
        let api = MockGoogleApi::new();
        api.respond_raw("/channels", 200, "<html>not json</html>");
        let client = client_for(&api, 5).await;

        let err = client.list_my_channels(&credential()).await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
        assert_eq!(api.requests_to("/channels").len(), 1);
    }

    #[tokio::test]
    async fn credential_without_token_makes_no_request() {
        let api = MockGoogleApi::new();
        let client = client_for(&api, 5).await;
        let credential = Credential::new(
            AccountIdentity::new("alice@example.com").unwrap(),
            1,
            None,
            None,
            None,
        );

        let err = client.list_my_channels(&credential).await.unwrap_err();
        assert_eq!(err.auth_challenge(), Some(AuthChallenge::ConsentRequired));
        assert!(api.requests().is_empty());
    }
}
