use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use opsdesk_core::auth::{
    AuthRuntime, Credential, FileStorage, LoginReason, NavigationSink, Notice, NotificationSink,
    SessionSink, SessionSnapshot,
};
use opsdesk_core::http::{FetchError, Outcome};
use opsdesk_core::{
    AuthenticatedClient, ClientConfig, ConfigLocator, RequestContext, RestoreOutcome,
    SessionLifecycle,
};
use reqwest::Method;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "OpsDesk admin console client")]
struct Cli {
    /// Directory holding config.json and stored credentials
    #[arg(long = "config-dir", global = true)]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Session restore and logout
    #[command(subcommand)]
    Session(SessionCommand),
    /// Inspect or seed stored credentials
    #[command(subcommand)]
    Tokens(TokensCommand),
    /// Show the identity behind the stored credentials
    Whoami(WhoamiArgs),
    /// Send an arbitrary request through the authenticated pipeline
    Request(RequestArgs),
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Rebuild the session from stored credentials
    Restore,
    /// Forget stored credentials
    Logout,
}

#[derive(Subcommand, Debug)]
enum TokensCommand {
    /// Store a credential pair obtained elsewhere
    Import(ImportArgs),
    /// Print credential expiry times
    Show,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Access credential value
    #[arg(long)]
    access: String,
    /// Refresh credential value
    #[arg(long)]
    refresh: String,
}

#[derive(Args, Debug)]
struct WhoamiArgs {
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// HTTP method (GET, POST, PUT, DELETE, ...)
    method: String,
    /// Path relative to the base URL, or an absolute URL
    path: String,
    /// JSON request body
    #[arg(long)]
    body: Option<String>,
    /// Send without credentials and skip failure handling
    #[arg(long = "skip-auth")]
    skip_auth: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let locator = match cli.config_dir {
        Some(dir) => ConfigLocator::from_root(dir),
        None => ConfigLocator::new(),
    }
    .context("unable to locate configuration directory")?;

    match cli.command {
        Commands::Session(cmd) => match cmd {
            SessionCommand::Restore => session_restore(&locator).await?,
            SessionCommand::Logout => session_logout(&locator)?,
        },
        Commands::Tokens(cmd) => match cmd {
            TokensCommand::Import(args) => tokens_import(&locator, args)?,
            TokensCommand::Show => tokens_show(&locator)?,
        },
        Commands::Whoami(args) => whoami(&locator, args).await?,
        Commands::Request(args) => request(&locator, args).await?,
    }
    Ok(())
}

async fn session_restore(locator: &ConfigLocator) -> Result<()> {
    let lifecycle = SessionLifecycle::new(build_client(locator)?);
    match lifecycle
        .restore()
        .await
        .context("failed to access stored credentials")?
    {
        RestoreOutcome::Restored(_) => {}
        RestoreOutcome::NoCredentials => {
            println!("No stored credentials; run `opsdesk tokens import`.")
        }
        RestoreOutcome::Failed(reason) => bail!("session restore failed: {reason}"),
    }
    Ok(())
}

fn session_logout(locator: &ConfigLocator) -> Result<()> {
    let lifecycle = SessionLifecycle::new(build_client(locator)?);
    lifecycle
        .logout()
        .context("failed to remove stored credentials")?;
    println!("Logged out of {}.", lifecycle.client().config().base_url);
    Ok(())
}

fn tokens_import(locator: &ConfigLocator, args: ImportArgs) -> Result<()> {
    let client = build_client(locator)?;
    let pair = client
        .store()
        .import(&args.access, &args.refresh)
        .context("failed to store credentials")?;
    println!(
        "Stored credentials for {} (access expires {}).",
        client.config().base_url,
        pair.access.expires_at()
    );
    Ok(())
}

fn tokens_show(locator: &ConfigLocator) -> Result<()> {
    let client = build_client(locator)?;
    let stored = client
        .store()
        .get()
        .context("failed to read stored credentials")?;
    println!("Origin  : {}", client.config().base_url);
    println!("Access  : {}", describe_expiry(stored.access.as_ref()));
    println!("Refresh : {}", describe_expiry(stored.refresh.as_ref()));
    Ok(())
}

fn describe_expiry(credential: Option<&Credential>) -> String {
    match credential {
        Some(credential) => format!("expires {}", credential.expires_at()),
        None => "absent or expired".to_owned(),
    }
}

async fn whoami(locator: &ConfigLocator, args: WhoamiArgs) -> Result<()> {
    let client = build_client(locator)?;
    let identity_path = client.config().identity_path.clone();
    let snapshot: SessionSnapshot = match client.get_data(&identity_path).await {
        Ok(snapshot) => snapshot,
        Err(FetchError::SignedOut(reason)) => bail!("signed out ({reason})"),
        Err(err) => return Err(err).context("identity request failed"),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        render_snapshot(&snapshot);
    }
    Ok(())
}

async fn request(locator: &ConfigLocator, args: RequestArgs) -> Result<()> {
    let client = build_client(locator)?;
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| anyhow!("invalid HTTP method '{}'", args.method))?;

    let mut context = RequestContext::new(method, args.path);
    if let Some(body) = args.body {
        let value: serde_json::Value =
            serde_json::from_str(&body).context("--body must be valid JSON")?;
        context = context.with_json(&value)?;
    }
    if args.skip_auth {
        context = context.skip_auth();
    }

    match client.execute(context).await.context("request failed")? {
        Outcome::Delivered(response) => {
            eprintln!("HTTP {}", response.status());
            println!("{}", response.text());
            Ok(())
        }
        Outcome::SignedOut(reason) => bail!("signed out ({reason})"),
    }
}

fn build_client(locator: &ConfigLocator) -> Result<AuthenticatedClient> {
    let config = ClientConfig::load(locator).context("failed to load configuration")?;
    debug!(base_url = %config.base_url, root = %locator.root().display(), "loaded configuration");
    let backend = Arc::new(FileStorage::new(locator.clone()));
    let terminal = Arc::new(Terminal);
    let runtime = AuthRuntime::new(terminal.clone(), terminal.clone(), terminal);
    AuthenticatedClient::new(config, backend, runtime).context("failed to build HTTP client")
}

fn render_snapshot(snapshot: &SessionSnapshot) {
    println!("User ID : {}", snapshot.user_id);
    if let Some(name) = &snapshot.name {
        println!("Name    : {}", name);
    }
    if let Some(role) = &snapshot.role {
        println!("Role    : {}", role);
    }
}

/// Host sinks for a terminal session: identity and notices are printed, and the
/// login screen is replaced by a hint on how to sign in again.
struct Terminal;

impl SessionSink for Terminal {
    fn publish(&self, snapshot: SessionSnapshot) {
        render_snapshot(&snapshot);
    }

    fn clear(&self) {}
}

impl NotificationSink for Terminal {
    fn notify(&self, notice: Notice) {
        match notice.code {
            Some(code) => eprintln!("error [{code}]: {}", notice.message),
            None => eprintln!("error: {}", notice.message),
        }
    }
}

impl NavigationSink for Terminal {
    fn to_login(&self, reason: LoginReason) {
        eprintln!("Sign-in required ({reason}); run `opsdesk tokens import` with fresh credentials.");
    }
}
