//! Shopgate CLI - Database migrations and operational tools.
//!
//! # Usage
//!
//! ```bash
//! # Run gateway database migrations
//! shopgate migrate
//!
//! # List installed shops
//! shopgate credentials list
//!
//! # Deactivate a shop's credential
//! shopgate credentials deactivate acme.myshopify.com
//!
//! # Sign a webhook payload for manual testing
//! shopgate webhook sign --file payload.json
//!
//! # Re-register mandatory webhooks for a shop
//! shopgate webhook register acme.myshopify.com
//!
//! # Delete expired webhook dedup records
//! shopgate idempotency purge
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "shopgate")]
#[command(author, version, about = "Shopgate CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage stored shop credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },
    /// Webhook signing and registration
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
    /// Maintain webhook dedup records
    Idempotency {
        #[command(subcommand)]
        action: IdempotencyAction,
    },
}

#[derive(Subcommand)]
enum CredentialsAction {
    /// List stored credentials
    List,
    /// Mark a shop's credential inactive
    Deactivate {
        /// Canonical shop domain (e.g. acme.myshopify.com)
        shop: String,
    },
}

#[derive(Subcommand)]
enum WebhookAction {
    /// Print the HMAC header value for a payload
    Sign {
        /// Payload file (reads stdin when omitted)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Reconcile mandatory subscriptions for an installed shop
    Register {
        /// Shop domain or handle
        shop: String,
    },
}

#[derive(Subcommand)]
enum IdempotencyAction {
    /// Delete expired records
    Purge,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Credentials { action } => match action {
            CredentialsAction::List => commands::credentials::list().await?,
            CredentialsAction::Deactivate { shop } => {
                commands::credentials::deactivate(&shop).await?;
            }
        },
        Commands::Webhook { action } => match action {
            WebhookAction::Sign { file } => commands::webhook::sign(file.as_deref())?,
            WebhookAction::Register { shop } => commands::webhook::register(&shop).await?,
        },
        Commands::Idempotency { action } => match action {
            IdempotencyAction::Purge => commands::idempotency::purge().await?,
        },
    }
    Ok(())
}
