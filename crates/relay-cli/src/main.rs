use anyhow::{Context, Result, bail};
use chrono::{TimeDelta, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::info;
use uuid::Uuid;

use relay_core::RelayConfig;
use relay_core::app::AppBuilder;
use relay_core::domain::{
    AlbumDescriptor, AlbumRecommendationFacet, ExpandOptions, Interaction, InteractionEvent,
    MusicPurchaseOutcome, Record, RecordModel,
};
use relay_core::impls::{CatalogRecommender, InMemoryRecordStore, SpotifyRecommender};
use relay_core::observability::init_tracing;
use relay_core::ports::{Recommender, RecordStore, SystemClock};

#[derive(Debug, Parser)]
#[command(name = "relay", about = "Album recommendation task pipeline")]
struct Cli {
    /// JSON settings file. Defaults apply to anything it leaves out.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Seed sample purchases, run the pipeline and print the facets it wrote.
    Demo {
        /// Contacts to seed.
        #[arg(long, default_value_t = 3)]
        contacts: usize,
    },
    /// Ask the recommender directly.
    Recommend {
        /// Comma-separated seed artist ids.
        #[arg(long, value_delimiter = ',', required = true)]
        artists: Vec<String>,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = RelayConfig::load(cli.config.as_deref()).context("loading settings")?;
    match cli.command {
        Command::Demo { contacts } => demo(config, contacts).await,
        Command::Recommend { artists, limit } => recommend(config, artists, limit).await,
    }
}

async fn recommend(config: RelayConfig, artists: Vec<String>, limit: usize) -> Result<()> {
    let recommender: Arc<dyn Recommender> = match config.spotify {
        Some(spotify) => Arc::new(SpotifyRecommender::new(spotify, Arc::new(SystemClock))),
        None => {
            info!("no spotify credentials, using the offline catalog");
            Arc::new(CatalogRecommender::new())
        }
    };
    let albums = recommender
        .recommend(&artists, limit)
        .await
        .context("requesting recommendations")?;
    println!("{}", serde_json::to_string_pretty(&albums)?);
    Ok(())
}

async fn demo(config: RelayConfig, contacts: usize) -> Result<()> {
    let store = InMemoryRecordStore::new(RecordModel::music());
    let seeded = seed_contacts(&store, contacts).await;
    let deadline = config.task_timeout();

    let app = AppBuilder::new(config)
        .record_store(Arc::new(store.clone()))
        .build()
        .context("building app")?
        .start()
        .await;

    let mut pipeline = app.pipeline();
    pipeline.register().await.context("registering pipeline")?;

    let finished = tokio::time::timeout(deadline, async {
        while !pipeline.is_finished().await? {
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::Ok(())
    })
    .await;

    let snapshots = pipeline.poll().await.context("polling pipeline")?;
    println!("{}", serde_json::to_string_pretty(&snapshots)?);

    for id in seeded {
        let record = store
            .get_by_id(id, &ExpandOptions::facet::<AlbumRecommendationFacet>())
            .await?;
        let facet = record.facet::<AlbumRecommendationFacet>()?.unwrap_or_default();
        println!("{id}: {}", serde_json::to_string_pretty(&facet)?);
    }

    info!(counts = ?app.counts().await, "demo finished");
    app.shutdown_and_join().await;

    match finished {
        Ok(result) => result,
        Err(_) => bail!("pipeline did not finish within {deadline:?}"),
    }
}

/// One recent purchase per contact, cycling through a few artists.
async fn seed_contacts(store: &InMemoryRecordStore, contacts: usize) -> Vec<Uuid> {
    let purchases = [
        AlbumDescriptor::new("muse", "Muse", "muse-absolution", "Absolution"),
        AlbumDescriptor::new("deftones", "Deftones", "deftones-white-pony", "White Pony"),
        AlbumDescriptor::new(
            "marilyn-manson",
            "Marilyn Manson",
            "manson-mechanical-animals",
            "Mechanical Animals",
        ),
    ];
    let now = Utc::now();

    let mut ids = Vec::with_capacity(contacts);
    for (i, album) in purchases.iter().cycle().take(contacts).enumerate() {
        let id = Uuid::new_v4();
        let mut record = Record::new(id);
        record.interactions.push(Interaction {
            id: Uuid::new_v4(),
            channel_id: Uuid::new_v4(),
            user_agent: "relay-demo".to_string(),
            started_at: now - TimeDelta::minutes(2),
            ended_at: now - TimeDelta::minutes(1),
            events: vec![InteractionEvent::MusicPurchaseOutcome(MusicPurchaseOutcome {
                timestamp: now - TimeDelta::minutes(1),
                currency_code: "AUD".to_string(),
                monetary_value: 20.0 + i as f64,
                album: album.clone(),
            })],
        });
        store.insert(record).await;
        ids.push(id);
    }
    info!(contacts = ids.len(), "seeded contacts");
    ids
}
