use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use dealflow::deal::{
    Actor, ApprovalCoordinator, DealStage, DealStateMachine, LineItem, NewDeal, Role,
    UriArtifactGenerator, VersionPayload,
};
use dealflow::store::MemoryStore;
use dealflow::DealStore;

#[derive(Parser)]
#[command(name = "dealflow")]
#[command(about = "Deal lifecycle engine: estimating, approval and dispatch handoff")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default dealflow.toml in the current directory
    Init {
        /// Overwrite an existing configuration file
        #[arg(long, help = "Force initialization, overwriting existing configuration")]
        force: bool,
    },
    /// Run a full lifecycle against the in-memory store and print the audit trail
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    dealflow::init_telemetry()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => init_command(force),
        Commands::Demo => demo_command().await,
    }
}

fn init_command(force: bool) -> Result<()> {
    let path = "dealflow.toml";
    if std::path::Path::new(path).exists() && !force {
        anyhow::bail!("{path} already exists (use --force to overwrite)");
    }
    dealflow::DealflowConfig::default().save_to_file(path)?;
    println!("Wrote {path}");
    Ok(())
}

/// Drive one deal from DRAFT to DISPATCHED and show every recorded activity.
async fn demo_command() -> Result<()> {
    dealflow::init_config()?;
    let cfg = dealflow::config()?;
    let generator = Arc::new(UriArtifactGenerator::new(
        cfg.approval.artifact_base_uri.clone(),
    ));
    let artifact_timeout = Duration::from_secs(cfg.approval.artifact_timeout_seconds);

    #[cfg(feature = "database")]
    if let Some(db) = &cfg.database {
        let store = Arc::new(
            dealflow::SqliteStore::new(&db.url, db.max_connections, db.auto_migrate).await?,
        );
        return run_lifecycle(store, generator, artifact_timeout).await;
    }

    run_lifecycle(Arc::new(MemoryStore::new()), generator, artifact_timeout).await
}

async fn run_lifecycle<S: DealStore>(
    store: Arc<S>,
    generator: Arc<UriArtifactGenerator>,
    artifact_timeout: Duration,
) -> Result<()> {
    let machine = DealStateMachine::new(store.clone());
    let coordinator = ApprovalCoordinator::new(store.clone(), generator)
        .with_artifact_timeout(artifact_timeout);

    let company_id = Uuid::new_v4();
    let requester = Actor::new(Uuid::new_v4(), company_id, Role::User);
    let estimator = Actor::new(Uuid::new_v4(), company_id, Role::Estimator);

    let (deal, version) = store
        .create_deal(NewDeal {
            company_id,
            contact_id: Uuid::new_v4(),
            title: "Loading dock refit".to_string(),
            initial_payload: VersionPayload::default(),
        })
        .await?;
    println!("Created deal {} in {}", deal.id, deal.stage);

    machine
        .request_transition(deal.id, DealStage::InEstimating, &requester)
        .await?;
    machine
        .update_pricing(
            deal.id,
            version.id,
            &estimator,
            VersionPayload {
                currency: "USD".to_string(),
                line_items: vec![
                    LineItem {
                        description: "Demolition".to_string(),
                        quantity: 1,
                        unit_price_cents: 250_000,
                    },
                    LineItem {
                        description: "Dock levelers".to_string(),
                        quantity: 2,
                        unit_price_cents: 480_000,
                    },
                ],
                notes: Some("Night work only".to_string()),
            },
        )
        .await?;
    machine
        .request_transition(deal.id, DealStage::PendingApproval, &estimator)
        .await?;

    let outcome = coordinator
        .approve_deal(deal.id, version.id, &estimator)
        .await?;
    println!(
        "Approved: stage {}, handoff {}, artifact {}",
        outcome.deal.stage, outcome.handoff.id, outcome.artifact.uri
    );

    println!("\nActivity trail:");
    for entry in store.list_activity(deal.id).await? {
        let edge = match (entry.from_stage, entry.to_stage) {
            (Some(from), Some(to)) => format!(" {from} -> {to}"),
            _ => String::new(),
        };
        println!("  #{} {:?}{edge}", entry.seq, entry.kind);
    }
    Ok(())
}
