/// Doc Commenting - operator tool
///
/// `doccomment-store [init]` creates the bucket index in the configured
/// SQLite repository. `doccomment-store list <subject-id> [limit] [offset]`
/// prints a subject's comments as JSON lines, newest first.
use anyhow::{bail, Context};
use doccomment_store::{CommentStore, Config, SqliteRepository};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LIST_LIMIT: i64 = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("Invalid configuration")?;

    let repository = SqliteRepository::open(&config.repository)
        .await
        .with_context(|| format!("Failed to open {}", config.repository.database_path.display()))?;
    let session = Arc::new(repository.login(config.repository.user_id.clone()));
    let store = CommentStore::new(session, config.store.clone());

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("init") => {
            let root = store.ensure_index().await?;
            tracing::info!(
                "Comment index ready at /{} ({})",
                config.store.root_location,
                root.as_str()
            );
        }
        Some("list") => {
            let subject = match args.get(1) {
                Some(subject) => subject,
                None => bail!("usage: doccomment-store list <subject-id> [limit] [offset]"),
            };
            let limit = parse_arg(args.get(2), DEFAULT_LIST_LIMIT, "limit")?;
            let offset = parse_arg(args.get(3), 0, "offset")?;

            for record in store.query_by_subject(subject, offset, limit).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Some(other) => bail!("unknown command: {}", other),
    }

    repository.close().await;
    Ok(())
}

fn parse_arg(raw: Option<&String>, default: i64, name: &str) -> anyhow::Result<i64> {
    match raw {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} must be an integer, got {}", name, raw)),
        None => Ok(default),
    }
}
