use super::{
    AccountPicker, Command, ConsentFlow, ConsentOutcome, PendingSelection, SessionHandle,
    SessionSnapshot, SessionState, SessionStatus, UploadOutcome, UploadRequest, Views,
};
use crate::credential::{
    AccountIdentity, Credential, RevocationSubscription, Revocations, TimeBoundAccessToken,
    TokenStore,
};
use crate::error::{AuthChallenge, FetchError};
use crate::fetcher::{ProfileInfo, RemoteFetcher, VideoSummary};
use crate::notifications;
use crate::oauth::OAuthManager;
use crate::settings::SettingsStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Profile,
    Videos,
}

impl FetchKind {
    fn what(self) -> &'static str {
        match self {
            FetchKind::Profile => "your profile",
            FetchKind::Videos => "your uploads",
        }
    }
}

enum Fetched {
    Profile(ProfileInfo),
    Videos(Vec<VideoSummary>),
}

/// Results sent back from background tasks.
enum Event {
    Fetched {
        task: u64,
        kind: FetchKind,
        generation: u64,
        /// `credential_serial` at the time the fetch started.
        serial: u64,
        retry: bool,
        result: Result<Fetched, FetchError>,
    },
    AccountChosen {
        task: u64,
        choice: Option<AccountIdentity>,
    },
    Consent {
        task: u64,
        generation: u64,
        account: AccountIdentity,
        outcome: ConsentOutcome,
    },
}

struct Task {
    id: u64,
    handle: JoinHandle<()>,
}

fn abort(slot: &mut Option<Task>) {
    if let Some(task) = slot.take() {
        task.handle.abort();
    }
}

/// Takes the task out of `slot` if the event came from it; stale events leave it alone.
fn finish(slot: &mut Option<Task>, id: u64) -> bool {
    if slot.as_ref().is_some_and(|t| t.id == id) {
        *slot = None;
        true
    } else {
        false
    }
}

/// Owns the state of one user session.
///
/// Build one with [`SessionController::new`], then hand it to [`SessionController::start`],
/// which moves it onto its own task.
pub struct SessionController<F, P, C> {
    fetcher: Arc<F>,
    picker: Arc<P>,
    consent: Arc<C>,
    settings: Arc<dyn SettingsStore>,
    tokens: Arc<dyn TokenStore>,
    oauth: Option<Arc<OAuthManager>>,
    revocations: RevocationSubscription,
    upload_playlist_id: String,
    views: Views,

    state: SessionState,
    account: Option<AccountIdentity>,
    credential: Option<Credential>,
    generation: u64,
    /// Bumped whenever a new credential is installed, including after consent for the same
    /// generation.
    credential_serial: u64,
    selection: PendingSelection,
    refreshing: bool,

    next_task: u64,
    profile_task: Option<Task>,
    videos_task: Option<Task>,
    prompt_task: Option<Task>,
    consent_task: Option<Task>,
    /// Fetches suspended until the running consent flow ends.
    awaiting_consent: Vec<FetchKind>,

    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    status: watch::Sender<SessionStatus>,
}

impl<F, P, C> SessionController<F, P, C>
where
    F: RemoteFetcher,
    P: AccountPicker,
    C: ConsentFlow,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: Arc<F>,
        picker: Arc<P>,
        consent: Arc<C>,
        settings: Arc<dyn SettingsStore>,
        tokens: Arc<dyn TokenStore>,
        revocations: &Revocations,
        upload_playlist_id: impl Into<String>,
        views: Views,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(32);
        let (status, _) = watch::channel(SessionStatus {
            state: SessionState::Unauthenticated,
            account: None,
            generation: 0,
            pending: 0,
        });
        Self {
            fetcher,
            picker,
            consent,
            settings,
            tokens,
            oauth: None,
            revocations: revocations.subscribe(),
            upload_playlist_id: upload_playlist_id.into(),
            views,
            state: SessionState::Unauthenticated,
            account: None,
            credential: None,
            generation: 0,
            credential_serial: 0,
            selection: PendingSelection::None,
            refreshing: false,
            next_task: 0,
            profile_task: None,
            videos_task: None,
            prompt_task: None,
            consent_task: None,
            awaiting_consent: Vec::new(),
            events_tx,
            events_rx,
            status,
        }
    }

    /// Lets credentials refresh expired access tokens on their own.
    pub fn with_oauth(mut self, oauth: Arc<OAuthManager>) -> Self {
        self.oauth = Some(oauth);
        self
    }

    /// The account remembered from an earlier run, if any. Never touches the network.
    pub fn load_persisted_account(&self) -> Option<AccountIdentity> {
        match self.settings.load_account() {
            Ok(account) => account,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "could not read persisted account");
                None
            }
        }
    }

    /// Starts the session on its own task.
    ///
    /// The account comes from `snapshot` if it names one, otherwise from the persisted
    /// settings. Without either, the user is asked to pick an account before anything is
    /// fetched.
    pub fn start(mut self, snapshot: Option<SessionSnapshot>) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let status = self.status.subscribe();

        let resumed = snapshot.and_then(|s| s.account);
        match resumed.or_else(|| self.load_persisted_account()) {
            Some(account) => {
                tracing::info!(%account, "resuming session");
                self.activate_account(account, false);
            }
            None => {
                tracing::info!("no account selected yet");
                self.prompt_account();
            }
        }
        self.publish();

        let task = tokio::spawn(self.run(commands_rx));
        SessionHandle {
            commands: commands_tx,
            status,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("every session handle is gone");
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                    self.publish();
                }
                Some(account) = self.revocations.recv() => {
                    self.on_revoked(account);
                    self.publish();
                }
            }
        }
        self.abort_all();
        tracing::debug!("session stopped");
    }

    /// Applies one command; `false` once the session should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        // status is published before acknowledging so that callers see the effect
        match command {
            Command::SelectAccount(account, ack) => {
                self.activate_account(account, true);
                self.publish();
                let _ = ack.send(());
            }
            Command::Refresh(ack) => {
                self.refresh();
                self.publish();
                let _ = ack.send(());
            }
            Command::SelectVideo(video, ack) => {
                self.select_video(video);
                self.publish();
                let _ = ack.send(());
            }
            Command::SelectFile(file, ack) => {
                self.select_file(file);
                self.publish();
                let _ = ack.send(());
            }
            Command::Upload(ack) => {
                let outcome = self.upload();
                self.publish();
                let _ = ack.send(outcome);
            }
            Command::Snapshot(ack) => {
                let _ = ack.send(SessionSnapshot {
                    account: self.account.clone(),
                });
            }
            Command::Shutdown(ack) => {
                tracing::info!("shutting down session");
                self.abort_all();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Fetched {
                task,
                kind,
                generation,
                serial,
                retry,
                result,
            } => {
                if !finish(self.fetch_slot(kind), task) || generation != self.generation {
                    tracing::trace!(?kind, generation, "dropping stale fetch result");
                    return;
                }
                self.on_fetched(kind, serial, retry, result);
            }
            Event::AccountChosen { task, choice } => {
                if !finish(&mut self.prompt_task, task) {
                    return;
                }
                match choice {
                    Some(account) => self.activate_account(account, true),
                    None => {
                        tracing::info!("user did not pick an account");
                        self.views.notifier.notify(notifications::no_account_selected());
                    }
                }
            }
            Event::Consent {
                task,
                generation,
                account,
                outcome,
            } => {
                if !finish(&mut self.consent_task, task)
                    || generation != self.generation
                    || self.account.as_ref() != Some(&account)
                {
                    tracing::trace!(%account, "dropping stale consent outcome");
                    return;
                }
                self.on_consent(account, outcome);
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "session state change");
            self.state = state;
        }
    }

    fn next_task_id(&mut self) -> u64 {
        self.next_task += 1;
        self.next_task
    }

    fn fetch_slot(&mut self, kind: FetchKind) -> &mut Option<Task> {
        match kind {
            FetchKind::Profile => &mut self.profile_task,
            FetchKind::Videos => &mut self.videos_task,
        }
    }

    fn fetching(&self) -> bool {
        self.profile_task.is_some() || self.videos_task.is_some()
    }

    fn abort_fetches(&mut self) {
        abort(&mut self.profile_task);
        abort(&mut self.videos_task);
        self.awaiting_consent.clear();
    }

    fn abort_all(&mut self) {
        self.abort_fetches();
        abort(&mut self.prompt_task);
        abort(&mut self.consent_task);
    }

    /// Derives the resting state from outstanding work and tells the world.
    fn publish(&mut self) {
        if self.consent_task.is_some() {
            self.set_state(SessionState::AwaitingConsent);
        } else if self.fetching() {
            self.set_state(SessionState::Refreshing);
        } else if matches!(
            self.state,
            SessionState::Refreshing | SessionState::AwaitingConsent
        ) {
            self.set_state(SessionState::Idle);
        }

        let refreshing = self.fetching();
        if refreshing != self.refreshing {
            self.refreshing = refreshing;
            self.views.uploads.set_refreshing(refreshing);
        }

        let pending = [
            &self.profile_task,
            &self.videos_task,
            &self.prompt_task,
            &self.consent_task,
        ]
        .iter()
        .filter(|t| t.is_some())
        .count();
        self.status.send_replace(SessionStatus {
            state: self.state,
            account: self.account.clone(),
            generation: self.generation,
            pending,
        });
    }

    fn build_credential(&mut self, account: &AccountIdentity) -> Credential {
        let stored = match self.tokens.load(account) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(%account, error = %format!("{e:#}"), "could not read stored token");
                None
            }
        };
        // a refresher can check a stored token before use; without one it is tried as-is
        let token = stored.map(|token| match self.oauth {
            Some(_) => TimeBoundAccessToken::expired(token),
            None => TimeBoundAccessToken::new(token),
        });
        self.credential_serial += 1;
        Credential::new(
            account.clone(),
            self.generation,
            token,
            self.oauth.clone(),
            Some(Arc::clone(&self.tokens)),
        )
    }

    /// Makes `account` current with a fresh credential and refreshes.
    fn activate_account(&mut self, account: AccountIdentity, persist: bool) {
        if persist && let Err(e) = self.settings.save_account(Some(&account)) {
            tracing::warn!(%account, error = %format!("{e:#}"), "could not persist account");
        }

        self.abort_all();
        self.generation += 1;
        tracing::info!(%account, generation = self.generation, "account selected");
        self.account = Some(account.clone());
        self.set_state(SessionState::AccountChosen);

        self.credential = Some(self.build_credential(&account));
        self.set_state(SessionState::CredentialReady);

        self.update_upload_enabled();
        self.refresh();
    }

    fn refresh(&mut self) {
        let Some(credential) = self.credential.clone() else {
            tracing::debug!("refresh without an account, nothing to do");
            return;
        };
        self.spawn_fetch(FetchKind::Profile, credential.clone(), false);
        self.spawn_fetch(FetchKind::Videos, credential, false);
    }

    /// Starts (or restarts) the background fetch of one kind.
    fn spawn_fetch(&mut self, kind: FetchKind, credential: Credential, retry: bool) {
        abort(self.fetch_slot(kind));
        self.awaiting_consent.retain(|k| *k != kind);
        self.set_state(SessionState::Refreshing);

        let task = self.next_task_id();
        let generation = credential.generation();
        let serial = self.credential_serial;
        let fetcher = Arc::clone(&self.fetcher);
        let events = self.events_tx.clone();
        tracing::debug!(?kind, generation, retry, "starting fetch");
        let handle = tokio::spawn(async move {
            let result = match kind {
                FetchKind::Profile => fetcher
                    .fetch_profile(&credential)
                    .await
                    .map(Fetched::Profile),
                FetchKind::Videos => fetcher
                    .fetch_uploaded_videos(&credential)
                    .await
                    .map(Fetched::Videos),
            };
            let _ = events
                .send(Event::Fetched {
                    task,
                    kind,
                    generation,
                    serial,
                    retry,
                    result,
                })
                .await;
        });
        *self.fetch_slot(kind) = Some(Task { id: task, handle });
    }

    fn on_fetched(
        &mut self,
        kind: FetchKind,
        serial: u64,
        retry: bool,
        result: Result<Fetched, FetchError>,
    ) {
        let error = match result {
            Ok(Fetched::Profile(profile)) => {
                self.views.uploads.set_profile_info(&profile);
                return;
            }
            Ok(Fetched::Videos(videos)) => {
                tracing::debug!(count = videos.len(), "showing uploads");
                self.views.uploads.set_videos(&videos);
                return;
            }
            Err(e) => e,
        };

        match error.auth_challenge() {
            Some(challenge) if retry => {
                tracing::warn!(?kind, %challenge, "fetch still unauthorized after consent");
                if let Some(account) = self.account.clone() {
                    self.consent_denied(&account);
                }
            }
            Some(_) if serial != self.credential_serial => {
                // consent was granted while this ran with the old credential
                if let Some(credential) = self.credential.clone() {
                    self.spawn_fetch(kind, credential, true);
                }
            }
            Some(challenge) => self.await_consent(kind, challenge),
            None if error.is_transient() => {
                tracing::warn!(?kind, error = %error, "fetch failed after retries");
                self.views
                    .notifier
                    .notify(notifications::fetch_failed_transiently(kind.what(), &error));
            }
            None => {
                tracing::error!(?kind, error = %error, "fetch failed");
                self.views
                    .notifier
                    .notify(notifications::fetch_failed(kind.what(), &error));
            }
        }
    }

    /// Suspends `kind` until consent is given, starting the consent flow unless one is running.
    fn await_consent(&mut self, kind: FetchKind, challenge: AuthChallenge) {
        if !self.awaiting_consent.contains(&kind) {
            self.awaiting_consent.push(kind);
        }
        if self.consent_task.is_some() {
            tracing::debug!(?kind, "joining consent flow in progress");
            return;
        }
        let Some(account) = self.account.clone() else {
            return;
        };

        tracing::info!(%account, %challenge, "asking user for consent");
        let task = self.next_task_id();
        let generation = self.generation;
        let consent = Arc::clone(&self.consent);
        let events = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            let outcome = consent.request_consent(account.clone(), challenge).await;
            let _ = events
                .send(Event::Consent {
                    task,
                    generation,
                    account,
                    outcome,
                })
                .await;
        });
        self.consent_task = Some(Task { id: task, handle });
        self.set_state(SessionState::AwaitingConsent);
    }

    fn on_consent(&mut self, account: AccountIdentity, outcome: ConsentOutcome) {
        let suspended = std::mem::take(&mut self.awaiting_consent);
        let token = match outcome {
            ConsentOutcome::Granted(token) => token,
            ConsentOutcome::Denied => {
                self.consent_denied(&account);
                return;
            }
        };

        tracing::info!(%account, retrying = ?suspended, "consent granted");
        if let Err(e) = self.tokens.save(&account, &token) {
            tracing::warn!(%account, error = %format!("{e:#}"), "could not store granted token");
        }
        self.credential_serial += 1;
        let credential = Credential::new(
            account,
            self.generation,
            Some(TimeBoundAccessToken::new(token)),
            self.oauth.clone(),
            Some(Arc::clone(&self.tokens)),
        );
        self.credential = Some(credential.clone());
        for kind in suspended {
            self.spawn_fetch(kind, credential.clone(), true);
        }
    }

    /// Gives up on the current account and asks the user to pick one again.
    fn consent_denied(&mut self, account: &AccountIdentity) {
        tracing::warn!(%account, "access not granted, back to account selection");
        self.views
            .notifier
            .notify(notifications::consent_denied(account));
        self.abort_fetches();
        abort(&mut self.consent_task);
        self.generation += 1;
        self.account = None;
        self.credential = None;
        self.set_state(SessionState::Unauthenticated);
        self.update_upload_enabled();
        self.prompt_account();
    }

    fn prompt_account(&mut self) {
        if self.prompt_task.is_some() {
            return;
        }
        let task = self.next_task_id();
        let picker = Arc::clone(&self.picker);
        let events = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            let choice = picker.choose_account().await;
            let _ = events.send(Event::AccountChosen { task, choice }).await;
        });
        self.prompt_task = Some(Task { id: task, handle });
    }

    fn on_revoked(&mut self, account: AccountIdentity) {
        if self.account.as_ref() != Some(&account) {
            tracing::trace!(%account, "revocation for another account");
            return;
        }
        tracing::warn!(%account, "access revoked, dropping credential");
        if let Err(e) = self.tokens.remove(&account) {
            tracing::warn!(%account, error = %format!("{e:#}"), "could not remove revoked token");
        }
        self.abort_fetches();
        abort(&mut self.consent_task);
        self.generation += 1;
        self.credential = Some(self.build_credential(&account));
        self.set_state(SessionState::CredentialReady);
        self.views
            .notifier
            .notify(notifications::access_revoked(&account));
    }

    fn update_upload_enabled(&mut self) {
        let enabled = self.account.is_some() && !self.selection.is_none();
        self.views.uploads.set_upload_enabled(enabled);
    }

    fn select_video(&mut self, video: VideoSummary) {
        tracing::debug!(video = %video.id, "video selected");
        self.views.direct.pan_to_video(&video);
        self.selection = PendingSelection::Video(video);
        self.update_upload_enabled();
    }

    fn select_file(&mut self, file: PathBuf) {
        tracing::debug!(file = %file.display(), "file selected");
        self.selection = PendingSelection::File(file);
        self.update_upload_enabled();
    }

    fn upload(&mut self) -> eyre::Result<UploadOutcome> {
        let Some(account) = self.account.clone() else {
            self.views
                .notifier
                .notify(notifications::no_account_selected());
            eyre::bail!("no account selected");
        };

        let outcome = match std::mem::take(&mut self.selection) {
            PendingSelection::None => {
                self.views
                    .notifier
                    .notify(notifications::nothing_to_upload());
                eyre::bail!("nothing selected to upload");
            }
            PendingSelection::Video(video) => {
                tracing::debug!(video = %video.id, "video is already uploaded");
                UploadOutcome::AlreadyUploaded(video)
            }
            PendingSelection::File(file) => {
                let request = UploadRequest {
                    file: file.clone(),
                    account,
                    playlist_id: self.upload_playlist_id.clone(),
                };
                if let Err(e) = self.views.submitter.submit(request.clone()) {
                    tracing::error!(file = %file.display(), error = %format!("{e:#}"), "upload submission failed");
                    self.views
                        .notifier
                        .notify(notifications::upload_failed(&file, &e));
                    self.selection = PendingSelection::File(file);
                    self.update_upload_enabled();
                    return Err(e);
                }
                tracing::info!(file = %file.display(), "upload submitted");
                self.views
                    .notifier
                    .notify(notifications::upload_submitted(&file));
                UploadOutcome::Submitted(request)
            }
        };
        self.update_upload_enabled();
        Ok(outcome)
    }
}
