//! Tollgate CLI - operator commands
//!
//! Usage:
//!   tollgate migrate
//!   tollgate purge-blocklist
//!   tollgate hash-password < password.txt
//!   tollgate create-role <name> [--description <text>]
//!   tollgate list-roles
//!   tollgate history <user-id> [--limit <n>]
//!   tollgate check-config

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use tollgate_auth::{AuthService, CredentialVerifier, Stores};
use tollgate_core::store::PgStore;
use tollgate_core::{AppConfig, LoggingConfig, UserId};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "Account, token and role administration for Tollgate")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the PostgreSQL schema
    Migrate,
    /// Drop expired token blocklist entries
    PurgeBlocklist,
    /// Hash a password read from stdin with the configured Argon2 parameters
    HashPassword,
    /// Create a role
    CreateRole {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List all roles
    ListRoles,
    /// Show a user's login history, oldest first
    History {
        user_id: String,
        /// Only the most recent N records
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Validate the configuration and print it with secrets redacted
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    init_tracing(&config.logging);

    match cli.command {
        Commands::Migrate => {
            let store = PgStore::connect(&config.database).await?;
            store.migrate().await?;
            info!("schema migrated");
            println!("Schema is up to date");
        }
        Commands::PurgeBlocklist => {
            let service = connect(&config).await?;
            let purged = service.purge_blocklist().await?;
            info!(purged, "blocklist purged");
            println!("Purged {purged} expired blocklist entries");
        }
        Commands::HashPassword => {
            let mut password = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut password)
                .context("failed to read password from stdin")?;
            let password = password.trim_end_matches(['\r', '\n']);
            anyhow::ensure!(!password.is_empty(), "password must not be empty");

            let verifier = CredentialVerifier::new(&config.auth.password)?;
            println!("{}", verifier.hash(password)?);
        }
        Commands::CreateRole { name, description } => {
            let service = connect(&config).await?;
            let role = service.create_role(&name, description).await?;
            info!(role_id = %role.id, name = %role.name, "role created");
            println!("{}\t{}", role.id, role.name);
        }
        Commands::ListRoles => {
            let service = connect(&config).await?;
            for role in service.list_roles().await? {
                println!(
                    "{}\t{}\t{}",
                    role.id,
                    role.name,
                    role.description.unwrap_or_default()
                );
            }
        }
        Commands::History { user_id, limit } => {
            let user_id: UserId = user_id.parse()?;
            let service = connect(&config).await?;
            for record in service.get_history(user_id, limit).await? {
                println!("{}\t{}", record.created_at.to_rfc3339(), record.user_agent);
            }
        }
        Commands::CheckConfig => {
            config.validate()?;
            if config.auth.uses_development_secret() {
                warn!("JWT_SECRET is the built-in development value");
            }
            let mut shown = config.clone();
            shown.auth.jwt_secret = "<redacted>".to_string();
            shown.database.postgres_url = redact_url(&shown.database.postgres_url);
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> anyhow::Result<AuthService> {
    let store = PgStore::connect(&config.database)
        .await
        .context("failed to connect to PostgreSQL")?;
    Ok(AuthService::new(&config.auth, Stores::postgres(store))?)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Hide the password component of a connection URL
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
