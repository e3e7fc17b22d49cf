mod commands;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use commands::{ShellCommand, HELP};
use identity_core::{
    load_settings,
    memory::{InMemoryIdentityBackend, InMemorySocialClient},
    IdentityBackend, IdentityStateMachine, MissingIdentityBackend, SessionController,
};
use shared::domain::ProviderKind;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// TOML settings file; `APP__*` environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Seed an email/password account as `email:password`.
    #[arg(long)]
    account: Vec<String>,
    /// Accept this Google id token for the given email, as `token:email`.
    #[arg(long)]
    google_token: Vec<String>,
    /// Run against a backend that is never reachable.
    #[arg(long)]
    offline: bool,
}

fn seeded_backend(args: &Args) -> Result<Arc<InMemoryIdentityBackend>> {
    let backend = InMemoryIdentityBackend::new();
    for (index, raw) in args.account.iter().enumerate() {
        let (email, password) = raw
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("--account expects email:password, got '{raw}'"))?;
        backend.add_account(&format!("seed-{index}"), email, password);
    }
    for raw in &args.google_token {
        let (token, email) = raw
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("--google-token expects token:email, got '{raw}'"))?;
        backend.register_external_token(ProviderKind::Google, token, email);
    }
    Ok(backend)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();
    let settings = load_settings(args.config.as_deref())?;

    let backend: Arc<dyn IdentityBackend> = if args.offline {
        warn!("running without an identity backend");
        Arc::new(MissingIdentityBackend)
    } else {
        seeded_backend(&args)?
    };
    let provision_on_start = settings.provision_on_start;
    let machine = IdentityStateMachine::new(backend, settings)
        .with_social_client(InMemorySocialClient::new(ProviderKind::Google));
    let mut controller = SessionController::new(Arc::new(machine));

    let mut events = controller.subscribe_events();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match commands::render_event(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(%err, "failed to encode session event"),
            }
        }
    });
    let forwarder = controller.forward_state_changes();

    if provision_on_start {
        if let Err(err) = controller.machine().ensure_identity().await {
            warn!(%err, "could not provision an identity on start");
        }
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match commands::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        match command {
            ShellCommand::Email(email) => controller.on_email_change(email),
            ShellCommand::Password(password) => controller.on_password_change(password),
            ShellCommand::EditProfile => controller.start_editing_profile(),
            ShellCommand::DisplayName(name) => controller.on_display_name_change(name),
            ShellCommand::CancelEdit => controller.cancel_editing_profile(),
            ShellCommand::OpenProtected => {
                println!("protected zone open: {}", controller.open_protected_zone());
            }
            ShellCommand::OpenProfile => {
                println!("profile open: {}", controller.open_profile());
            }
            ShellCommand::State => {
                println!("{}", serde_json::to_string_pretty(&controller.session_state())?);
            }
            ShellCommand::Intent(intent) => {
                controller.handle(intent).await;
            }
            ShellCommand::Help => println!("{HELP}"),
            ShellCommand::Quit => break,
        }
    }

    forwarder.abort();
    printer.abort();
    info!("identity shell stopped");
    Ok(())
}
