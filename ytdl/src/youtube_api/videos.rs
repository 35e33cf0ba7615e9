//! YouTube Videos API types.

use crate::youtube_api::types::PageInfo;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Response structure for the `videos.list` API call.
///
/// Contains a list of [`Video`] resources that match the request criteria,
/// along with pagination information in [`PageInfo`].
///
/// See: <https://developers.google.com/youtube/v3/docs/videos/list>
#[derive(Debug, Serialize, Deserialize)]
pub struct VideoListResponse {
    /// Identifies the API resource's type.
    ///
    /// The value will be `youtube#videoListResponse`.
    #[serde(default)]
    pub kind: String,
    /// A list of videos that match the request criteria.
    #[serde(default)]
    pub items: Vec<Video>,
    #[serde(rename = "pageInfo", default)]
    pub page_info: PageInfo,
}

/// A `video` resource represents a YouTube video.
///
/// Only the `snippet` and `status` parts are requested, and both may be absent if the video
/// was deleted between listing the playlist and looking the video up.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos#resource>
#[derive(Debug, Serialize, Deserialize)]
pub struct Video {
    /// The ID that YouTube uses to uniquely identify the video.
    pub id: String,
    pub snippet: Option<VideoSnippet>,
    pub status: Option<VideoStatus>,
}

/// Basic details about the video.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos#snippet>
#[derive(Debug, Serialize, Deserialize)]
pub struct VideoSnippet {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The date and time that the video was published.
    #[serde(rename = "publishedAt")]
    pub published_at: Option<Timestamp>,
    #[serde(default)]
    pub thumbnails: Thumbnails,
}

/// Thumbnail images in the sizes YouTube always provides.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Thumbnails {
    pub default: Option<Thumbnail>,
    pub medium: Option<Thumbnail>,
    pub high: Option<Thumbnail>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Thumbnails {
    /// The largest available thumbnail.
    pub fn best(&self) -> Option<&Thumbnail> {
        self.high
            .as_ref()
            .or(self.medium.as_ref())
            .or(self.default.as_ref())
    }
}

/// See: <https://developers.google.com/youtube/v3/docs/videos#status>
#[derive(Debug, Serialize, Deserialize)]
pub struct VideoStatus {
    #[serde(rename = "privacyStatus")]
    pub privacy_status: PrivacyStatus,
}

/// The video's privacy status.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos#status.privacyStatus>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrivacyStatus {
    /// The video is public and can be viewed by anyone.
    Public,
    /// The video is unlisted and can only be viewed by people with the link.
    Unlisted,
    /// The video is private and can only be viewed by the owner and authorized viewers.
    Private,
    /// Any status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for PrivacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Unlisted => write!(f, "unlisted"),
            Self::Private => write!(f, "private"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl Video {
    pub fn is_public(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.privacy_status == PrivacyStatus::Public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_snippet_and_status() {
        let response: VideoListResponse = serde_json::from_str(
            r#"{
              "kind": "youtube#videoListResponse",
              "pageInfo": { "totalResults": 2, "resultsPerPage": 2 },
              "items": [
                {
                  "id": "v1",
                  "snippet": {
                    "publishedAt": "2024-03-01T12:00:00Z",
                    "title": "Hello",
                    "thumbnails": {
                      "default": { "url": "https://i.ytimg.com/vi/v1/default.jpg", "width": 120, "height": 90 },
                      "medium": { "url": "https://i.ytimg.com/vi/v1/mqdefault.jpg" }
                    }
                  },
                  "status": { "privacyStatus": "public", "uploadStatus": "processed" }
                },
                {
                  "id": "v2",
                  "status": { "privacyStatus": "scheduled" }
                }
              ]
            }"#,
        )
        .unwrap();

        let first = &response.items[0];
        assert!(first.is_public());
        let snippet = first.snippet.as_ref().unwrap();
        assert_eq!(snippet.title, "Hello");
        assert_eq!(
            snippet.thumbnails.best().map(|t| t.url.as_str()),
            Some("https://i.ytimg.com/vi/v1/mqdefault.jpg")
        );
        assert_eq!(
            snippet.published_at,
            Some("2024-03-01T12:00:00Z".parse().unwrap())
        );

        let second = &response.items[1];
        assert!(!second.is_public());
        assert_eq!(
            second.status.as_ref().unwrap().privacy_status,
            PrivacyStatus::Unknown
        );
    }
}
