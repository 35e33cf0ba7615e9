use clap::{Parser, Subcommand};
use eyre::Context;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use ytdl::config::default_config_path;
use ytdl::credential::Revocations;
use ytdl::notifications::{self, Notice};
use ytdl::oauth::{BrowserConsent, OAuthManager};
use ytdl::session::{
    AccountPicker, DirectView, Notifier, SessionSnapshot, UploadOutcome, UploadRequest,
    UploadSubmitter, UploadsView, Views,
};
use ytdl::youtube_api::YouTubeClient;
use ytdl::{
    AccountIdentity, Config, JsonSettings, JsonTokenStore, ProfileInfo, SessionController,
    SessionHandle, SettingsStore, TokenStore, VideoSummary,
};

#[derive(Parser)]
#[command(name = "ytdl", about = "Browse your YouTube uploads and submit new ones")]
#[command(version)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the configuration is complete
    CheckConfig,

    /// Choose the Google account to use from now on
    Account {
        /// Account email address
        email: String,
    },

    /// Show the account's profile and public uploads
    List {
        /// Use this account instead of the saved one
        #[arg(long)]
        account: Option<String>,
    },

    /// Submit a video file for upload
    Upload {
        file: PathBuf,

        /// Use this account instead of the saved one
        #[arg(long)]
        account: Option<String>,
    },

    /// Forget the saved account and its token
    Logout,
}

/// Asks for an account on the terminal.
struct ConsolePicker;

impl AccountPicker for ConsolePicker {
    async fn choose_account(&self) -> Option<AccountIdentity> {
        let line = tokio::task::spawn_blocking(|| {
            eprint!("Google account to use (leave empty to cancel): ");
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;
        match line {
            Ok(Ok(line)) => AccountIdentity::new(line).ok(),
            _ => None,
        }
    }
}

struct ConsoleView;

impl UploadsView for ConsoleView {
    fn set_profile_info(&mut self, profile: &ProfileInfo) {
        let name = profile.display_name.as_deref().unwrap_or("(no name)");
        match &profile.email {
            Some(email) => println!("Signed in as {name} <{email}>"),
            None => println!("Signed in as {name}"),
        }
    }

    fn set_videos(&mut self, videos: &[VideoSummary]) {
        if videos.is_empty() {
            println!("No public uploads.");
            return;
        }
        println!("Public uploads:");
        for video in videos {
            println!("  {}  {}", video.watch_url(), video.title);
        }
    }

    fn set_refreshing(&mut self, refreshing: bool) {
        tracing::debug!(refreshing, "refresh indicator");
    }

    fn set_upload_enabled(&mut self, enabled: bool) {
        tracing::debug!(enabled, "upload indicator");
    }
}

impl DirectView for ConsoleView {
    fn pan_to_video(&mut self, video: &VideoSummary) {
        println!("Now showing {} ({})", video.title, video.watch_url());
    }
}

impl Notifier for ConsoleView {
    fn notify(&mut self, notice: Notice) {
        eprintln!("{notice}");
    }
}

/// Hands files to the upload service. There is none bundled, so requests are only validated
/// and reported.
struct ConsoleSubmitter;

impl UploadSubmitter for ConsoleSubmitter {
    fn submit(&mut self, request: UploadRequest) -> eyre::Result<()> {
        let metadata = std::fs::metadata(&request.file)
            .with_context(|| format!("inspect {}", request.file.display()))?;
        if !metadata.is_file() {
            eyre::bail!("{} is not a file", request.file.display());
        }
        tracing::info!(
            file = %request.file.display(),
            account = %request.account,
            playlist = %request.playlist_id,
            bytes = metadata.len(),
            "upload request ready"
        );
        Ok(())
    }
}

fn parse_account(account: Option<String>) -> eyre::Result<Option<AccountIdentity>> {
    account
        .map(AccountIdentity::new)
        .transpose()
        .context("parse account")
}

fn print_remediation(path: &std::path::Path, error: &ytdl::ConfigurationError) {
    eprintln!("Configuration at {} is incomplete:", path.display());
    for item in &error.missing {
        eprintln!("  - {}", notifications::missing_configuration(item));
    }
}

/// Starts a console session, resuming `account` if given.
fn start_session(
    config: &Config,
    settings: Arc<JsonSettings>,
    tokens: Arc<JsonTokenStore>,
    account: Option<AccountIdentity>,
) -> eyre::Result<SessionHandle> {
    let oauth = Arc::new(
        OAuthManager::new(
            config.oauth.client_id.clone(),
            config.oauth.client_secret.clone(),
        )
        .with_token_url(config.endpoints.token.clone()),
    );
    let fetcher = Arc::new(YouTubeClient::from_config(config)?);
    let views = Views {
        uploads: Box::new(ConsoleView),
        direct: Box::new(ConsoleView),
        notifier: Box::new(ConsoleView),
        submitter: Box::new(ConsoleSubmitter),
    };
    let controller = SessionController::new(
        fetcher,
        Arc::new(ConsolePicker),
        Arc::new(BrowserConsent::new(Arc::clone(&oauth))),
        settings,
        tokens,
        &Revocations::new(),
        config.upload_playlist_id.clone(),
        views,
    )
    .with_oauth(oauth);
    Ok(controller.start(account.map(|account| SessionSnapshot {
        account: Some(account),
    })))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = Config::load_or_init(&config_path)?;
    if let Err(e) = config.check() {
        print_remediation(&config_path, &e);
        return Err(e).context("load configuration");
    }

    let data_dir = config.data_dir();
    let settings = Arc::new(JsonSettings::in_dir(&data_dir));
    let tokens = Arc::new(JsonTokenStore::in_dir(&data_dir));

    match cli.command {
        Commands::CheckConfig => {
            println!("Configuration at {} is complete.", config_path.display());
        }
        Commands::Account { email } => {
            let account = AccountIdentity::new(email).context("parse account")?;
            settings.save_account(Some(&account))?;
            let session = start_session(&config, settings, tokens, Some(account))?;
            let status = session.settled().await;
            session.shutdown().await?;
            match status.account {
                Some(account) => println!("Now using {account}."),
                None => eyre::bail!("no account is in use"),
            }
        }
        Commands::List { account } => {
            let account = parse_account(account)?;
            let session = start_session(&config, settings, tokens, account)?;
            session.settled().await;
            session.shutdown().await?;
        }
        Commands::Upload { file, account } => {
            let account = parse_account(account)?;
            let session = start_session(&config, settings, tokens, account)?;
            let status = session.settled().await;
            if status.account.is_none() {
                session.shutdown().await?;
                eyre::bail!("no account selected, nothing uploaded");
            }
            session.select_file(file).await?;
            let outcome = session.upload().await;
            session.shutdown().await?;
            match outcome? {
                UploadOutcome::Submitted(request) => println!(
                    "Submitted {} to playlist {} as {}.",
                    request.file.display(),
                    request.playlist_id,
                    request.account
                ),
                UploadOutcome::AlreadyUploaded(video) => {
                    println!("{} is already on YouTube.", video.title)
                }
            }
        }
        Commands::Logout => {
            let account = settings.load_account()?;
            settings.save_account(None)?;
            if let Some(account) = account {
                tokens.remove(&account)?;
                println!("Forgot {account}.");
            } else {
                println!("No account was saved.");
            }
        }
    }

    Ok(())
}
