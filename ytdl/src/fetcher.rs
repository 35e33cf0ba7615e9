//! Fetching the signed-in user's profile and uploaded videos.
//!
//! The [`RemoteFetcher`] trait is what the session controller runs in its background tasks;
//! [`YouTubeClient`] implements it against the real Google APIs.

use crate::credential::Credential;
use crate::error::FetchError;
use crate::youtube_api::{Person, PrivacyStatus, VideoListResponse, YouTubeClient};
use std::future::Future;
use tracing::instrument;

/// How many uploads are shown. Only the first page of the uploads playlist is requested.
pub const MAX_UPLOADS: usize = 20;

pub const YOUTUBE_WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// One uploaded video as shown in the uploads list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSummary {
    pub id: String,
    pub title: String,
    pub privacy_status: PrivacyStatus,
    pub thumbnail_url: Option<String>,
}

impl VideoSummary {
    pub fn watch_url(&self) -> String {
        format!("{YOUTUBE_WATCH_URL_PREFIX}{}", self.id)
    }
}

/// What is shown about the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileInfo {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

impl From<&Person> for ProfileInfo {
    fn from(person: &Person) -> Self {
        Self {
            display_name: person.display_name().map(str::to_string),
            email: person.email().map(str::to_string),
            photo_url: person.photo_url().map(str::to_string),
        }
    }
}

/// Remote reads made on behalf of one credential.
///
/// Implementations must not have side effects beyond the network calls themselves.
pub trait RemoteFetcher: Send + Sync + 'static {
    fn fetch_profile(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<ProfileInfo, FetchError>> + Send;

    /// The user's public uploads, sorted by title.
    fn fetch_uploaded_videos(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Vec<VideoSummary>, FetchError>> + Send;
}

/// Keeps the public videos and sorts them by title.
///
/// The sort is stable and compares titles by code point, so equal titles keep the order the
/// API returned them in.
pub fn summarize_uploads(videos: VideoListResponse) -> Vec<VideoSummary> {
    let mut summaries: Vec<_> = videos
        .items
        .into_iter()
        .filter(|video| video.is_public())
        .map(|video| {
            let (title, thumbnail_url) = match &video.snippet {
                Some(snippet) => (
                    snippet.title.clone(),
                    snippet.thumbnails.best().map(|t| t.url.clone()),
                ),
                None => (String::new(), None),
            };
            VideoSummary {
                id: video.id,
                title,
                privacy_status: PrivacyStatus::Public,
                thumbnail_url,
            }
        })
        .collect();
    summaries.sort_by(|a, b| a.title.cmp(&b.title));
    summaries
}

impl RemoteFetcher for YouTubeClient {
    #[instrument(skip(self, credential), fields(account = %credential.account()))]
    async fn fetch_profile(&self, credential: &Credential) -> Result<ProfileInfo, FetchError> {
        let person = self.get_my_profile(credential).await?;
        Ok(ProfileInfo::from(&person))
    }

    #[instrument(skip(self, credential), fields(account = %credential.account()))]
    async fn fetch_uploaded_videos(
        &self,
        credential: &Credential,
    ) -> Result<Vec<VideoSummary>, FetchError> {
        let channels = self.list_my_channels(credential).await?;
        let Some(playlist_id) = channels.uploads_playlist() else {
            tracing::debug!("account has no channel with an uploads playlist");
            return Ok(Vec::new());
        };

        let items = self
            .list_playlist_items(credential, playlist_id, MAX_UPLOADS as u32)
            .await?;
        let video_ids: Vec<&str> = items.video_ids().take(MAX_UPLOADS).collect();
        if video_ids.is_empty() {
            tracing::debug!(playlist_id, "uploads playlist is empty");
            return Ok(Vec::new());
        }

        let videos = self.list_videos(credential, &video_ids).await?;
        let summaries = summarize_uploads(videos);
        tracing::debug!(
            listed = video_ids.len(),
            public = summaries.len(),
            "fetched uploaded videos"
        );
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::config::Endpoints;
    use crate::credential::{AccountIdentity, token_response};
    use crate::error::AuthChallenge;
    use crate::mock::MockGoogleApi;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn credential() -> Credential {
        Credential::with_token(
            AccountIdentity::new("alice@example.com").unwrap(),
            1,
            token_response("test-token"),
        )
    }

    async fn client_for(api: &MockGoogleApi) -> YouTubeClient {
        let base = api.start().await.unwrap();
        YouTubeClient::new(
            reqwest::Client::new(),
            Endpoints {
                youtube: base.clone(),
                people: base,
                ..Endpoints::default()
            },
            "api-key",
            BackoffPolicy::no_retry(),
        )
    }

    fn channel_with_uploads(playlist: &str) -> serde_json::Value {
        json!({
            "kind": "youtube#channelListResponse",
            "items": [{ "id": "UC1", "contentDetails": { "relatedPlaylists": { "uploads": playlist } } }]
        })
    }

    fn playlist_of(ids: &[&str]) -> serde_json::Value {
        let items: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| json!({ "id": format!("item{i}"), "contentDetails": { "videoId": id } }))
            .collect();
        json!({ "kind": "youtube#playlistItemListResponse", "items": items })
    }

    fn video(id: &str, title: &str, privacy: &str) -> serde_json::Value {
        json!({
            "id": id,
            "snippet": {
                "title": title,
                "publishedAt": "2024-01-01T00:00:00Z",
                "thumbnails": { "default": { "url": format!("https://i.ytimg.com/vi/{id}/default.jpg") } }
            },
            "status": { "privacyStatus": privacy }
        })
    }

    #[tokio::test]
    async fn uploads_are_filtered_and_sorted() {
        let api = MockGoogleApi::new();
        api.respond("/channels", 200, channel_with_uploads("UU1"))
            .respond("/playlistItems", 200, playlist_of(&["v1", "v2", "v3", "v4", "v5"]))
            .respond(
                "/videos",
                200,
                json!({ "items": [
                    video("v1", "b", "public"),
                    video("v2", "Z", "private"),
                    video("v3", "a", "public"),
                    video("v4", "b", "public"),
                    video("v5", "c", "unlisted"),
                ]}),
            );
        let client = client_for(&api).await;

        let videos = client.fetch_uploaded_videos(&credential()).await.unwrap();
        let got: Vec<_> = videos
            .iter()
            .map(|v| (v.id.as_str(), v.title.as_str()))
            .collect();
        assert_eq!(got, vec![("v3", "a"), ("v1", "b"), ("v4", "b")]);
        assert!(
            videos
                .iter()
                .all(|v| v.privacy_status == PrivacyStatus::Public)
        );
        assert_eq!(
            videos[0].thumbnail_url.as_deref(),
            Some("https://i.ytimg.com/vi/v3/default.jpg")
        );
        assert_eq!(videos[0].watch_url(), "https://www.youtube.com/watch?v=v3");

        let items_request = &api.requests_to("/playlistItems")[0];
        assert_eq!(items_request.query["playlistId"], "UU1");
        assert_eq!(items_request.query["maxResults"], "20");
        assert_eq!(items_request.query["part"], "id,contentDetails");
        assert_eq!(api.requests_to("/videos")[0].query["id"], "v1,v2,v3,v4,v5");
    }

    #[tokio::test]
    async fn uppercase_sorts_before_lowercase() {
        let api = MockGoogleApi::new();
        api.respond("/channels", 200, channel_with_uploads("UU1"))
            .respond("/playlistItems", 200, playlist_of(&["v1", "v2"]))
            .respond(
                "/videos",
                200,
                json!({ "items": [video("v1", "apple", "public"), video("v2", "Zebra", "public")] }),
            );
        let client = client_for(&api).await;

        let videos = client.fetch_uploaded_videos(&credential()).await.unwrap();
        let titles: Vec<_> = videos.iter().map(|v| v.title.as_str()).collect();
        assert_eq!(titles, vec!["Zebra", "apple"]);
    }

    #[tokio::test]
    async fn no_channel_means_no_videos_and_no_more_calls() {
        let api = MockGoogleApi::new();
        api.respond("/channels", 200, json!({ "kind": "youtube#channelListResponse" }));
        let client = client_for(&api).await;

        let videos = client.fetch_uploaded_videos(&credential()).await.unwrap();
        assert!(videos.is_empty());
        assert_eq!(api.requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_playlist_skips_the_video_lookup() {
        let api = MockGoogleApi::new();
        api.respond("/channels", 200, channel_with_uploads("UU1"))
            .respond("/playlistItems", 200, playlist_of(&[]));
        let client = client_for(&api).await;

        let videos = client.fetch_uploaded_videos(&credential()).await.unwrap();
        assert!(videos.is_empty());
        assert!(api.requests_to("/videos").is_empty());
    }

    #[tokio::test]
    async fn at_most_twenty_videos_are_looked_up() {
        let ids: Vec<String> = (0..25).map(|i| format!("v{i:02}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let api = MockGoogleApi::new();
        api.respond("/channels", 200, channel_with_uploads("UU1"))
            .respond("/playlistItems", 200, playlist_of(&id_refs))
            .respond("/videos", 200, json!({ "items": [] }));
        let client = client_for(&api).await;

        client.fetch_uploaded_videos(&credential()).await.unwrap();

        let requested = api.requests_to("/videos")[0].query["id"].clone();
        assert_eq!(requested.split(',').count(), MAX_UPLOADS);
        assert_eq!(requested, id_refs[..MAX_UPLOADS].join(","));
    }

    #[tokio::test]
    async fn consent_errors_surface_from_any_step() {
        let api = MockGoogleApi::new();
        api.respond("/channels", 200, channel_with_uploads("UU1"))
            .respond("/playlistItems", 200, playlist_of(&["v1"]))
            .respond(
                "/videos",
                403,
                json!({ "error": { "code": 403, "message": "Insufficient Permission", "errors": [{ "reason": "insufficientPermissions" }] } }),
            );
        let client = client_for(&api).await;

        let err = client
            .fetch_uploaded_videos(&credential())
            .await
            .unwrap_err();
        assert_eq!(err.auth_challenge(), Some(AuthChallenge::ConsentRequired));
    }

    #[tokio::test]
    async fn profile_takes_the_first_of_each_field() {
        let api = MockGoogleApi::new();
        api.respond(
            "/people/me",
            200,
            json!({
                "resourceName": "people/123",
                "names": [{ "displayName": "Alice Example" }, { "displayName": "Alias" }],
                "emailAddresses": [{ "value": "alice@example.com" }],
                "photos": [{ "url": "https://lh3.googleusercontent.com/a/photo", "default": true }]
            }),
        );
        let client = client_for(&api).await;

        let profile = client.fetch_profile(&credential()).await.unwrap();
        assert_eq!(
            profile,
            ProfileInfo {
                display_name: Some("Alice Example".to_string()),
                email: Some("alice@example.com".to_string()),
                photo_url: Some("https://lh3.googleusercontent.com/a/photo".to_string()),
            }
        );
        assert_eq!(
            api.requests_to("/people/me")[0].query["personFields"],
            "names,emailAddresses,photos"
        );
    }

    #[tokio::test]
    async fn profile_fields_may_be_missing() {
        let api = MockGoogleApi::new();
        api.respond("/people/me", 200, json!({ "resourceName": "people/123" }));
        let client = client_for(&api).await;

        let profile = client.fetch_profile(&credential()).await.unwrap();
        assert_eq!(profile, ProfileInfo::default());
    }
}
