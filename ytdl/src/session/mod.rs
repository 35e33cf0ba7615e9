//! The session: which account is in use, whether it may be used, and what the user has picked.
//!
//! A [`SessionController`] owns the session state and every view collaborator. Once started it
//! runs on its own task and is driven through the returned [`SessionHandle`]. Remote work
//! (fetches, the account prompt, the consent flow) runs in further background tasks whose
//! results are sent back to the controller's task, which is the only place views are touched.
//!
//! ```text
//! Unauthenticated -> AccountChosen -> CredentialReady -> Refreshing -> Idle
//!                                                            |  ^
//!                                                            v  | (granted)
//!                                                      AwaitingConsent -> Unauthenticated (denied)
//! ```

mod controller;

pub use controller::SessionController;

use crate::credential::AccountIdentity;
use crate::error::AuthChallenge;
use crate::fetcher::{ProfileInfo, VideoSummary};
use crate::notifications::Notice;
use eyre::Context;
use oauth2::basic::BasicTokenResponse;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No account is set; nothing is fetched.
    Unauthenticated,
    AccountChosen,
    CredentialReady,
    /// At least one fetch is in flight.
    Refreshing,
    /// Fetches are suspended until the user grants (or refuses) consent.
    AwaitingConsent,
    Idle,
}

/// Published by the controller after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub account: Option<AccountIdentity>,
    /// Credential generation; bumped on every account selection and revocation.
    pub generation: u64,
    /// Background work still outstanding: fetches, the account prompt and the consent flow.
    pub pending: usize,
}

/// What will be acted on when the user asks to upload. A file and a video exclude each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PendingSelection {
    #[default]
    None,
    File(PathBuf),
    Video(VideoSummary),
}

impl PendingSelection {
    pub fn is_none(&self) -> bool {
        matches!(self, PendingSelection::None)
    }
}

/// A media file to hand to the upload service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file: PathBuf,
    pub account: AccountIdentity,
    /// Playlist the uploaded video is added to.
    pub playlist_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Submitted(UploadRequest),
    /// The selection was a video that is already on YouTube, so nothing was submitted.
    AlreadyUploaded(VideoSummary),
}

/// Transient state carried across a restart of the session within one process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub account: Option<AccountIdentity>,
}

#[derive(Debug, Clone)]
pub enum ConsentOutcome {
    Granted(BasicTokenResponse),
    /// Refused, cancelled, or the flow could not be completed.
    Denied,
}

/// Asks the user which account to use.
pub trait AccountPicker: Send + Sync + 'static {
    /// `None` if the user declined to pick one.
    fn choose_account(&self) -> impl Future<Output = Option<AccountIdentity>> + Send;
}

/// Walks the user through granting this application access to their account.
pub trait ConsentFlow: Send + Sync + 'static {
    fn request_consent(
        &self,
        account: AccountIdentity,
        challenge: AuthChallenge,
    ) -> impl Future<Output = ConsentOutcome> + Send;
}

/// The list of uploads and the profile header above it.
pub trait UploadsView: Send + 'static {
    fn set_profile_info(&mut self, profile: &ProfileInfo);
    fn set_videos(&mut self, videos: &[VideoSummary]);
    fn set_refreshing(&mut self, refreshing: bool);
    fn set_upload_enabled(&mut self, enabled: bool);
}

/// The player/preview pane.
pub trait DirectView: Send + 'static {
    fn pan_to_video(&mut self, video: &VideoSummary);
}

pub trait Notifier: Send + 'static {
    fn notify(&mut self, notice: Notice);
}

/// Hands a file to whatever performs the actual upload.
pub trait UploadSubmitter: Send + 'static {
    fn submit(&mut self, request: UploadRequest) -> eyre::Result<()>;
}

/// Everything the session renders to or hands work off to.
pub struct Views {
    pub uploads: Box<dyn UploadsView>,
    pub direct: Box<dyn DirectView>,
    pub notifier: Box<dyn Notifier>,
    pub submitter: Box<dyn UploadSubmitter>,
}

pub(crate) enum Command {
    SelectAccount(AccountIdentity, oneshot::Sender<()>),
    Refresh(oneshot::Sender<()>),
    SelectVideo(VideoSummary, oneshot::Sender<()>),
    SelectFile(PathBuf, oneshot::Sender<()>),
    Upload(oneshot::Sender<eyre::Result<UploadOutcome>>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Drives a running session.
///
/// Every method returns once the controller has applied the command, so a following
/// [`SessionHandle::settled`] observes its effects.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> eyre::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| eyre::eyre!("session has shut down"))?;
        rx.await.context("session has shut down")
    }

    /// Switches to `account`, remembers it for the next run, and refreshes.
    pub async fn select_account(&self, account: AccountIdentity) -> eyre::Result<()> {
        self.request(|ack| Command::SelectAccount(account, ack)).await
    }

    /// Fetches profile and uploads again. Does nothing without an account.
    pub async fn refresh(&self) -> eyre::Result<()> {
        self.request(Command::Refresh).await
    }

    pub async fn select_video(&self, video: VideoSummary) -> eyre::Result<()> {
        self.request(|ack| Command::SelectVideo(video, ack)).await
    }

    pub async fn select_file(&self, file: impl Into<PathBuf>) -> eyre::Result<()> {
        let file = file.into();
        self.request(|ack| Command::SelectFile(file, ack)).await
    }

    pub async fn upload(&self) -> eyre::Result<UploadOutcome> {
        self.request(Command::Upload).await?
    }

    pub async fn snapshot(&self) -> eyre::Result<SessionSnapshot> {
        self.request(Command::Snapshot).await
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Waits until no background work is outstanding.
    pub async fn settled(&self) -> SessionStatus {
        let mut status = self.status.clone();
        let settled = match status.wait_for(|s| s.pending == 0).await {
            Ok(s) => Some(s.clone()),
            Err(_) => None,
        };
        // the controller is gone; report whatever it published last
        settled.unwrap_or_else(|| status.borrow().clone())
    }

    /// Stops the session. Results still in flight are discarded and no view is updated after
    /// this returns.
    pub async fn shutdown(self) -> eyre::Result<()> {
        if self.request(Command::Shutdown).await.is_err() {
            tracing::debug!("session already stopped");
        }
        self.task.await.context("session task failed")
    }
}
