pub mod config;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use config::AppConfig;
use shortid::{CollisionOutcome, Projector, RestSource, ShortIds};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "shortid")]
#[command(about = "Short numeric ids for opaque entity keys")]
pub struct Cli {
    /// Backend base URL (overrides SHORTID_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Backend collection (overrides SHORTID_COLLECTION)
    #[arg(long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the projected id of each opaque id
    Project {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Resolve a projected id against the backend
    Resolve { projected: String },
    /// Scan the backend and report completeness, collisions and risk
    Audit,
    /// Serve project/resolve over HTTP
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::from_env().context("failed to read configuration")?;
    if let Some(base_url) = cli.base_url {
        config.base_url = Some(base_url);
    }
    if let Some(collection) = cli.collection {
        config.collection = collection;
    }

    match cli.command {
        Command::Project { ids } => project(&config, &ids),
        Command::Resolve { projected } => resolve(&config, &projected).await,
        Command::Audit => audit(&config).await,
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.bind.clone());
            serve(&config, &bind).await
        }
    }
}

fn project(config: &AppConfig, ids: &[String]) -> Result<()> {
    let projector = Projector::new(config.resolver.modulus)?;
    for raw in ids {
        let projected = projector
            .project_str(raw)
            .with_context(|| format!("cannot project '{}'", raw))?;
        println!("{}\t{}", raw, projected);
    }
    Ok(())
}

fn connect(config: &AppConfig) -> Result<ShortIds<RestSource>> {
    let base_url = config
        .base_url
        .as_deref()
        .ok_or_else(|| anyhow!("no backend configured; set SHORTID_BASE_URL or --base-url"))?;

    let mut source = RestSource::new(base_url, &config.collection)?.id_field(&config.id_field);
    if let Some(token) = &config.token {
        source = source.bearer_token(token);
    }

    Ok(ShortIds::new(source, config.resolver.clone())?)
}

async fn resolve(config: &AppConfig, projected: &str) -> Result<()> {
    let ids = connect(config)?;
    let opaque = ids
        .resolve_segment(projected)
        .await
        .with_context(|| format!("cannot resolve '{}'", projected))?;
    println!("{}", opaque);
    Ok(())
}

async fn audit(config: &AppConfig) -> Result<()> {
    let ids = connect(config)?;
    let index = ids.cache().get_or_build().await?;
    let summary = index.summary();
    let projector = ids.resolver().projector();

    println!("collection:   {}", ids.cache().source().collection_url());
    println!(
        "scanned:      {} ({} malformed)",
        summary.scanned_count, summary.invalid_count
    );
    println!("pages:        {}", summary.pages_fetched);
    println!("complete:     {}", summary.complete);
    println!("entries:      {}", summary.entries);
    println!(
        "collisions:   {} ({} unresolved)",
        summary.collisions, summary.unresolved
    );
    println!(
        "risk:         p(collision) = {:.4} over [0, {})",
        projector.collision_probability(summary.scanned_count),
        projector.modulus()
    );
    if projector.is_unsafe_for(summary.scanned_count) {
        println!(
            "warning:      corpus exceeds {} entities; widen the modulus",
            projector.safe_corpus_size()
        );
    }

    for collision in index.collisions() {
        let outcome = match &collision.outcome {
            CollisionOutcome::Kept(opaque) => format!("kept {}", opaque),
            CollisionOutcome::Unresolved => "unresolved".to_string(),
        };
        let candidates = collision
            .candidates
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {} -> [{}] {}", collision.projected, candidates, outcome);
    }

    Ok(())
}

async fn serve(config: &AppConfig, bind: &str) -> Result<()> {
    let ids = Arc::new(connect(config)?);
    let app = shortid::web::router(ids);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("listening on {}", bind);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
