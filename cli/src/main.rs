use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use erasmus_client::api;
use erasmus_client::auth;
use erasmus_client::config::{ClientConfig, DEFAULT_API_BASE_URL, DEFAULT_AUTH_FILE, ENV_API_BASE_URL, ENV_AUTH_FILE};
use erasmus_client::deferred::{ActionKind, Dispatch};
use erasmus_client::error::{ApiError, ConfigError};
use erasmus_client::scope::ViewScope;
use erasmus_client::toggle::{ToggleCell, ToggleKind, ToggleOutcome, ToggleState, ToggleTarget};
use erasmus_client::types::{EntityId, RegisterPayload, RegisterRole, UpdateProfilePayload};
use erasmus_client::EventsClient;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("{0} is full")]
    Full(ToggleTarget),
    #[error("event {0} not found")]
    EventGone(EntityId),
    #[error("login canceled")]
    LoginCanceled,
    #[error("{0} was not sent; nothing changed")]
    NotSent(ToggleTarget),
    #[error("stdin read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "erasmus-cli", about = "Erasmus events API CLI")]
struct Cli {
    #[arg(long, env = ENV_API_BASE_URL, default_value = DEFAULT_API_BASE_URL)]
    base_url: String,

    #[arg(long, env = ENV_AUTH_FILE, default_value = DEFAULT_AUTH_FILE)]
    auth_file: PathBuf,

    /// Repeat for more log output on stderr.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    Register(RegisterArgs),
    Profile(ProfileCommand),
    Event(EventCommand),
    Org(OrgCommand),
    Notifications(NotificationsCommand),
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    password: String,
    #[arg(long, default_value_t = false)]
    organizer: bool,
}

#[derive(Args, Debug)]
struct ProfileCommand {
    #[command(subcommand)]
    command: ProfileSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProfileSubcommand {
    Update {
        #[arg(long)]
        phone_number: Option<String>,
        #[arg(long)]
        bio: Option<String>,
    },
}

#[derive(Args, Debug)]
struct EventCommand {
    #[command(subcommand)]
    command: EventSubcommand,
}

#[derive(Subcommand, Debug)]
enum EventSubcommand {
    Upcoming,
    Show { event_id: EntityId },
    Participate { event_id: EntityId },
    Interest { event_id: EntityId },
    Cancel { event_id: EntityId },
    Uncancel { event_id: EntityId },
}

#[derive(Args, Debug)]
struct OrgCommand {
    #[command(subcommand)]
    command: OrgSubcommand,
}

#[derive(Subcommand, Debug)]
enum OrgSubcommand {
    Show { org_id: EntityId },
    Events { org_id: EntityId },
    Follow { org_id: EntityId },
}

#[derive(Args, Debug)]
struct NotificationsCommand {
    #[command(subcommand)]
    command: NotificationsSubcommand,
}

#[derive(Subcommand, Debug)]
enum NotificationsSubcommand {
    Unread,
    List,
    Read { notification_id: EntityId },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let config = ClientConfig::new(&cli.base_url, cli.auth_file)?;
    let client = EventsClient::from_config(&config);

    match cli.command {
        Command::Login { username, password } => {
            client.login(&username, &password).await?;
            print_json(&json!({ "logged_in": username }))
        }
        Command::Logout => {
            client.logout();
            print_json(&json!({ "logged_out": true }))
        }
        Command::Whoami => {
            let profile = auth::current_profile(&mut client.read_flow()).await;
            print_json(&serde_json::to_value(profile)?)
        }
        Command::Register(args) => run_register(&client, args).await,
        Command::Profile(profile) => run_profile(&client, profile).await,
        Command::Event(event) => run_event(&client, event).await,
        Command::Org(org) => run_org(&client, org).await,
        Command::Notifications(notifications) => run_notifications(&client, notifications).await,
    }
}

async fn run_register(client: &EventsClient, args: RegisterArgs) -> Result<(), CliError> {
    let payload = RegisterPayload {
        username: args.username,
        email: args.email,
        first_name: args.first_name,
        last_name: args.last_name,
        password: args.password,
        role: if args.organizer { RegisterRole::Organizer } else { RegisterRole::Attendee },
    };
    auth::register(client.requests(), &payload).await?;
    print_json(&json!({ "registered": payload.username }))
}

async fn run_profile(client: &EventsClient, profile: ProfileCommand) -> Result<(), CliError> {
    match profile.command {
        ProfileSubcommand::Update { phone_number, bio } => {
            let payload = UpdateProfilePayload { phone_number, bio };
            let updated = api::update_profile(client.requests(), &payload).await?;
            print_json(&serde_json::to_value(updated)?)
        }
    }
}

async fn run_event(client: &EventsClient, event: EventCommand) -> Result<(), CliError> {
    match event.command {
        EventSubcommand::Upcoming => {
            let events = api::upcoming_events(&mut client.read_flow()).await?;
            print_json(&serde_json::to_value(events)?)
        }
        EventSubcommand::Show { event_id } => {
            let scope = ViewScope::new("event-show");
            let detail =
                api::load_event_detail(client.requests(), event_id, &scope).await?.ok_or(CliError::EventGone(event_id))?;
            print_json(&json!({
                "event": detail.event,
                "participants": detail.participants,
            }))
        }
        EventSubcommand::Participate { event_id } => run_deferred(client, ActionKind::Participate, event_id).await,
        EventSubcommand::Interest { event_id } => run_deferred(client, ActionKind::Interest, event_id).await,
        EventSubcommand::Cancel { event_id } => {
            let event = api::cancel_event(client.requests(), event_id).await?;
            print_json(&serde_json::to_value(event)?)
        }
        EventSubcommand::Uncancel { event_id } => {
            let event = api::uncancel_event(client.requests(), event_id).await?;
            print_json(&serde_json::to_value(event)?)
        }
    }
}

/// Press participate/interest; without a credential, log in inline and replay.
async fn run_deferred(client: &EventsClient, kind: ActionKind, event_id: EntityId) -> Result<(), CliError> {
    let scope = ViewScope::new("event-action");
    let detail =
        api::load_event_detail(client.requests(), event_id, &scope).await?.ok_or(CliError::EventGone(event_id))?;
    let cell = match kind {
        ActionKind::Participate => detail.participation,
        ActionKind::Interest => detail.interest,
    };

    let outcome = match client.request_toggle(kind, &cell).await {
        Dispatch::Executed(outcome) => outcome,
        Dispatch::LoginRequired => {
            eprintln!("Log in to {kind} in event {event_id}.");
            let username = prompt("username: ").await?;
            if username.is_empty() {
                client.cancel_login();
                return Err(CliError::LoginCanceled);
            }
            let password = prompt("password: ").await?;
            let target = cell.target();
            let replayed = client
                .login_and_resume(&username, &password, |action| {
                    (ToggleKind::from(action.kind) == target.kind && action.target_id == target.id)
                        .then(|| cell.clone())
                })
                .await?;
            replayed.unwrap_or(ToggleOutcome::Dropped)
        }
    };
    print_toggle(&cell, outcome)
}

async fn run_org(client: &EventsClient, org: OrgCommand) -> Result<(), CliError> {
    match org.command {
        OrgSubcommand::Show { org_id } => {
            let organization = api::organization_detail(&mut client.read_flow(), org_id).await?;
            print_json(&serde_json::to_value(organization)?)
        }
        OrgSubcommand::Events { org_id } => {
            let events = api::organization_events(&mut client.read_flow(), org_id).await?;
            print_json(&serde_json::to_value(events)?)
        }
        OrgSubcommand::Follow { org_id } => {
            let organization = api::organization_detail(&mut client.read_flow(), org_id).await?;
            let cell = ToggleCell::new(
                ToggleTarget::new(ToggleKind::Follow, org_id),
                organization.following(),
                ViewScope::new("org-follow"),
            );
            let outcome = client.follow(&cell).await;
            print_toggle(&cell, outcome)
        }
    }
}

async fn run_notifications(client: &EventsClient, notifications: NotificationsCommand) -> Result<(), CliError> {
    match notifications.command {
        NotificationsSubcommand::Unread => {
            let unread = api::unread_notifications(client.requests()).await?;
            print_json(&json!({ "unread": unread }))
        }
        NotificationsSubcommand::List => {
            let items = api::list_notifications(client.requests()).await?;
            print_json(&serde_json::to_value(items)?)
        }
        NotificationsSubcommand::Read { notification_id } => {
            api::mark_notification_read(client.requests(), notification_id).await?;
            print_json(&json!({ "read": notification_id }))
        }
    }
}

async fn prompt(label: &str) -> Result<String, CliError> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(label.as_bytes()).await?;
    stderr.flush().await?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_owned())
}

fn print_toggle(cell: &ToggleCell, outcome: ToggleOutcome) -> Result<(), CliError> {
    match outcome {
        ToggleOutcome::Committed(state) => print_state(cell.target(), state),
        ToggleOutcome::Disabled => Err(CliError::Full(cell.target())),
        ToggleOutcome::Dropped => Err(CliError::NotSent(cell.target())),
        ToggleOutcome::Failed(e) => Err(e.into()),
    }
}

fn print_state(target: ToggleTarget, state: ToggleState) -> Result<(), CliError> {
    let mut value = serde_json::to_value(state)?;
    if let Value::Object(map) = &mut value {
        map.insert("target".to_owned(), Value::String(target.to_string()));
    }
    print_json(&value)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
