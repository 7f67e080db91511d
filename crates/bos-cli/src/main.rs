#![forbid(unsafe_code)]

//! **bos-cli** – Command-line interface for the BOS kernel.
//!
//! Every invocation wires a fresh [`bos_kernel::Kernel`] over an in-memory
//! store (`bos-store-memory`): nothing here is durable across process
//! exits. A production deployment wires the kernel over a persistent
//! `StorageBackend` the same way, just with a different driver crate.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bos_auth_support::hs256::{build_claims, JwtHs256Token};
use bos_auth_support::CapabilityToken;
use bos_bus::SubscriberBus;
use bos_context::SystemClock;
use bos_store_memory::MemoryBackend;
use bos_types::{ActorType, BusinessId, Command};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "bos")]
#[command(about = "BOS kernel CLI - bootstrap a demo business and submit commands against it")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// JWT secret used by `generate-token` (use a real secret in production)
    #[arg(long, default_value = "bos-development-secret-change-in-production")]
    jwt_secret: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap a fresh business, register its owner, activate it, and
    /// submit one consent-grant command so the resulting hash chain has
    /// more than a single link.
    Demo {
        /// Business name
        #[arg(long, default_value = "Acme")]
        name: String,
    },
    /// Bootstrap a fresh business and submit one arbitrary command
    /// against it as the registered owner.
    Submit {
        /// Dotted command type (e.g. `identity.consent.grant`)
        #[arg(long)]
        command_type: String,
        /// JSON payload for the command
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Idempotency key, if this submission should be deduplicated
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Wire a kernel, bootstrap a demo business, and print every event
    /// committed until interrupted (Ctrl+C).
    Daemon,
    /// Generate a development JWT capability token.
    GenerateToken {
        /// Subject (actor id)
        #[arg(long, default_value = "dev-owner")]
        subject: String,
        /// Business id to scope the token to (a fresh one if omitted)
        #[arg(long)]
        business_id: Option<Uuid>,
        /// Scopes (comma-separated)
        #[arg(long, default_value = "marketing")]
        scopes: String,
        /// Lifetime in seconds
        #[arg(long, default_value_t = 86_400)]
        ttl_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;
    info!("starting bos-cli v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Demo { name } => handle_demo(name).await?,
        Commands::Submit { command_type, payload, idempotency_key } => handle_submit(command_type, payload, idempotency_key).await?,
        Commands::Daemon => handle_daemon().await?,
        Commands::GenerateToken { subject, business_id, scopes, ttl_secs } => handle_generate_token(&cli.jwt_secret, subject, business_id, scopes, ttl_secs)?,
    }

    Ok(())
}

/// Assemble a fresh in-memory kernel with the built-in administrative
/// command set wired in.
fn wire_demo_kernel() -> bos_kernel::wiring::Wired {
    let store = Arc::new(MemoryBackend::new());
    let bus = Arc::new(SubscriberBus::new(1024));
    bos_kernel::wiring::wire(store, bus, Arc::new(SystemClock), None)
}

fn admin_command(business_id: BusinessId, command_type: &str, payload: serde_json::Value) -> Command {
    Command {
        command_id: Uuid::new_v4(),
        command_type: command_type.to_string(),
        business_id,
        branch_id: None,
        actor_type: ActorType::System,
        actor_id: "bootstrap".to_string(),
        correlation_id: None,
        issued_at: chrono::Utc::now(),
        payload,
        source_engine: "cli".to_string(),
        idempotency_key: None,
    }
}

/// Bootstrap a business, register `owner` as its first human actor, and
/// activate it. Returns the business id for further commands.
async fn bootstrap(kernel: &bos_kernel::Kernel, name: &str, owner: &str) -> Result<BusinessId> {
    let business_id = BusinessId::new();

    let create = admin_command(business_id, "identity.business.create", serde_json::json!({ "name": name }));
    let outcome = kernel.submit(create).await;
    anyhow::ensure!(outcome.is_accepted(), "business.create was rejected: {outcome:?}");

    let register = admin_command(business_id, "identity.actor.register", serde_json::json!({ "actor_type": "HUMAN", "actor_id": owner }));
    let outcome = kernel.submit(register).await;
    anyhow::ensure!(outcome.is_accepted(), "actor.register was rejected: {outcome:?}");

    let activate = Command {
        actor_type: ActorType::Human,
        actor_id: owner.to_string(),
        ..admin_command(business_id, "identity.business.activate", serde_json::json!({}))
    };
    let outcome = kernel.submit(activate).await;
    anyhow::ensure!(outcome.is_accepted(), "business.activate was rejected: {outcome:?}");

    Ok(business_id)
}

async fn handle_demo(name: String) -> Result<()> {
    let wired = wire_demo_kernel();
    let owner = "owner-1";
    let business_id = bootstrap(&wired.kernel, &name, owner).await?;
    info!(%business_id, "business bootstrapped");

    let consent = Command {
        actor_type: ActorType::Human,
        actor_id: owner.to_string(),
        ..admin_command(business_id, "identity.consent.grant", serde_json::json!({ "actor_id": owner, "scope": "marketing" }))
    };
    let outcome = wired.kernel.submit(consent).await;

    println!("business: {business_id}");
    match outcome {
        bos_types::Outcome::Accepted { events } => {
            for event in &events {
                println!("  + {} (hash {}, prev {})", event.event_type, event.event_hash, event.previous_event_hash);
            }
        }
        bos_types::Outcome::Rejected { error } => println!("  ! rejected: {} ({})", error.message, error.code),
    }

    let log = wired.kernel.read(business_id, bos_store_core::ReadQuery::default()).await?;
    println!("full chain ({} events):", log.len());
    for event in &log {
        println!("  {} -> {}", event.previous_event_hash, event.event_hash);
    }

    Ok(())
}

async fn handle_submit(command_type: String, payload: String, idempotency_key: Option<String>) -> Result<()> {
    let payload: serde_json::Value = serde_json::from_str(&payload).context("payload must be valid JSON")?;
    let wired = wire_demo_kernel();
    let owner = "owner-1";
    let business_id = bootstrap(&wired.kernel, "Acme", owner).await?;

    let command = Command {
        idempotency_key,
        actor_type: ActorType::Human,
        actor_id: owner.to_string(),
        ..admin_command(business_id, &command_type, payload)
    };
    debug!(?command, "submitting command");
    let outcome = wired.kernel.submit(command).await;

    match outcome {
        bos_types::Outcome::Accepted { events } => {
            println!("accepted: {} event(s) appended to business {business_id}", events.len());
            for event in &events {
                println!("  + {}", event.event_type);
            }
        }
        bos_types::Outcome::Rejected { error } => {
            println!("rejected: {} [{}] {}", error.code, error.policy_name, error.message);
        }
    }

    Ok(())
}

async fn handle_daemon() -> Result<()> {
    println!("starting bos daemon (Ctrl+C to stop)");
    let store = Arc::new(MemoryBackend::new());
    let bus = Arc::new(SubscriberBus::new(1024));
    let mut rx = bus.subscribe_stream();
    let wired = bos_kernel::wiring::wire(store, bus, Arc::new(SystemClock), None);

    let business_id = bootstrap(&wired.kernel, "Acme", "owner-1").await?;
    info!(%business_id, "demo business bootstrapped, listening for events");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => println!("event: {} ({})", event.event_type, event.event_id),
                    Err(err) => {
                        tracing::error!(error = %err, "live stream closed");
                        break;
                    }
                }
            }
            _ = &mut ctrl_c => {
                println!("shutdown signal received");
                break;
            }
        }
    }

    println!("daemon stopped");
    Ok(())
}

fn handle_generate_token(secret: &str, subject: String, business_id: Option<Uuid>, scopes: String, ttl_secs: u64) -> Result<()> {
    let business_id = BusinessId(business_id.unwrap_or_else(Uuid::new_v4));
    let scopes: Vec<String> = scopes.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    let claims = build_claims(&subject, ActorType::Human, business_id, scopes.clone(), ttl_secs)?;

    let token = tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(JwtHs256Token::mint(&claims, secret.as_bytes())))?;

    println!("subject: {subject}");
    println!("business: {business_id}");
    println!("scopes: {}", scopes.join(","));
    println!("token: {}", token.as_str());

    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
    Ok(())
}
