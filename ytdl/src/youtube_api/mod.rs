//! Google API client library.
//!
//! Covers the handful of read-only calls needed to show a user's uploads:
//!
//! 1. [`YouTubeClient::list_my_channels`] finds the channel's uploads playlist,
//! 2. [`YouTubeClient::list_playlist_items`] lists the first page of that playlist,
//! 3. [`YouTubeClient::list_videos`] looks up title, thumbnail and privacy of those videos,
//!
//! plus [`YouTubeClient::get_my_profile`] on the People API for the user's name and photo.

pub mod channels;
pub mod client;
pub mod people;
pub mod playlist_items;
pub mod types;
pub mod videos;

pub use client::YouTubeClient;
pub use types::{ApiErrorResponse, PageInfo};

pub use channels::{Channel, ChannelListResponse};
pub use people::Person;
pub use playlist_items::{PlaylistItem, PlaylistItemListResponse};
pub use videos::{PrivacyStatus, Thumbnails, Video, VideoListResponse, VideoSnippet};
