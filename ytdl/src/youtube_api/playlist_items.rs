//! YouTube PlaylistItems API types.

use crate::youtube_api::types::PageInfo;
use serde::{Deserialize, Serialize};

/// Response structure for the `playlistItems.list` API call.
///
/// See: <https://developers.google.com/youtube/v3/docs/playlistItems/list>
#[derive(Debug, Serialize, Deserialize)]
pub struct PlaylistItemListResponse {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub items: Vec<PlaylistItem>,
    #[serde(rename = "pageInfo", default)]
    pub page_info: PageInfo,
    /// Token that can be used as the value of the pageToken parameter to retrieve the next page in the result set.
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

/// See: <https://developers.google.com/youtube/v3/docs/playlistItems#resource>
#[derive(Debug, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub id: String,
    #[serde(rename = "contentDetails")]
    pub content_details: PlaylistItemContentDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaylistItemContentDetails {
    /// The ID that YouTube uses to uniquely identify the video the item refers to.
    #[serde(rename = "videoId")]
    pub video_id: String,
}

impl PlaylistItemListResponse {
    pub fn video_ids(&self) -> impl Iterator<Item = &str> {
        self.items
            .iter()
            .map(|item| item.content_details.video_id.as_str())
    }
}
