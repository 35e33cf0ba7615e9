//! YouTube Channels API types.

use crate::youtube_api::types::PageInfo;
use serde::{Deserialize, Serialize};

/// Response structure for the `channels.list` API call.
///
/// See: <https://developers.google.com/youtube/v3/docs/channels/list>
#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelListResponse {
    /// Identifies the API resource's type.
    ///
    /// The value will be `youtube#channelListResponse`.
    #[serde(default)]
    pub kind: String,
    /// A list of channels that match the request criteria.
    ///
    /// Google omits the field entirely when the account has no channel.
    #[serde(default)]
    pub items: Vec<Channel>,
    #[serde(rename = "pageInfo", default)]
    pub page_info: PageInfo,
}

/// A `channel` resource, restricted to the parts requested with `part=contentDetails`.
///
/// See: <https://developers.google.com/youtube/v3/docs/channels#resource>
#[derive(Debug, Serialize, Deserialize)]
pub struct Channel {
    /// The ID that YouTube uses to uniquely identify the channel.
    pub id: String,
    #[serde(rename = "contentDetails")]
    pub content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelContentDetails {
    #[serde(rename = "relatedPlaylists")]
    pub related_playlists: RelatedPlaylists,
}

/// Playlists YouTube maintains for every channel.
///
/// See: <https://developers.google.com/youtube/v3/docs/channels#contentDetails.relatedPlaylists>
#[derive(Debug, Serialize, Deserialize)]
pub struct RelatedPlaylists {
    /// The ID of the playlist that contains the channel's uploaded videos.
    pub uploads: Option<String>,
    /// The ID of the playlist that contains the channel's liked videos.
    pub likes: Option<String>,
}

impl ChannelListResponse {
    /// The uploads playlist of the first channel that has one.
    pub fn uploads_playlist(&self) -> Option<&str> {
        self.items
            .iter()
            .filter_map(|c| c.content_details.as_ref())
            .find_map(|d| d.related_playlists.uploads.as_deref())
    }
}
