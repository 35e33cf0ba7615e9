//! Browse and upload to a YouTube account from the desktop.
//!
//! The [`session`] module tracks which Google account is in use and drives background fetches
//! of the user's profile and public uploads through [`fetcher`]. Everything the user sees goes
//! through collaborator traits (`UploadsView`, `Notifier`, ...) so that any front end can be
//! plugged in; the `ytdl-cli` binary is a console one.

pub mod backoff;
pub mod config;
pub mod credential;
pub mod error;
pub mod fetcher;
pub mod notifications;
pub mod oauth;
pub mod session;
pub mod settings;
pub mod youtube_api;

#[cfg(test)]
pub(crate) mod mock;

pub use config::Config;
pub use credential::{AccountIdentity, Credential, JsonTokenStore, Revocations, TokenStore};
pub use error::{AuthChallenge, ConfigurationError, FetchError};
pub use fetcher::{ProfileInfo, RemoteFetcher, VideoSummary};
pub use session::{SessionController, SessionHandle, SessionSnapshot, SessionState};
pub use settings::{JsonSettings, SettingsStore};
