mod ai;
mod config;
mod db;
mod error;
mod models;
mod pipeline;

use ai::{EnrichmentClient, ValidationMode};
use config::Config;
use db::Repository;
use error::{AppError, Result};
use models::{Difficulty, NewArticle};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let config = Config::load()?;
    let repo = Repository::new(&config.db_path).await?;

    match args.get(1).map(String::as_str) {
        Some("--process") => {
            let limit = args
                .get(2)
                .and_then(|s| s.parse().ok())
                .unwrap_or(config.batch_limit);
            let api_key = config.llm_api_key.clone().ok_or_else(|| {
                AppError::Config(format!(
                    "llm_api_key is not set; add it to {:?}",
                    Config::config_path()
                ))
            })?;
            let client = EnrichmentClient::new(api_key);
            let mode = if config.strict_validation {
                ValidationMode::Strict
            } else {
                ValidationMode::Lenient
            };

            let report =
                pipeline::run_batch(&repo, limit, config.max_failures, mode, |article| {
                    let client = &client;
                    async move { client.generate(&article).await }
                })
                .await?;

            println!(
                "Batch finished: {} selected, {} succeeded, {} failed, {} skipped (failure cap)",
                report.selected, report.succeeded, report.failed, report.skipped_exhausted
            );
        }

        Some("--migrate") => {
            let migrated = repo.migrate_legacy_rows().await?;
            println!("Migrated {} legacy feedback rows", migrated);
        }

        Some("--reap") => {
            let minutes = args
                .get(2)
                .and_then(|s| s.parse().ok())
                .unwrap_or(config.stale_after_minutes);
            let reaped = repo
                .reap_stale_in_progress(chrono::Duration::minutes(minutes as i64))
                .await?;
            println!("Released {} stale claims older than {} minutes", reaped, minutes);
        }

        Some("--reset") => {
            let id: i64 = args
                .get(2)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("--reset requires an article id"))?;
            repo.reset(id).await?;
            println!("Reset article {}", id);
        }

        Some("--pending") => {
            let limit = args
                .get(2)
                .and_then(|s| s.parse().ok())
                .unwrap_or(config.batch_limit);
            let ids = repo.select_eligible(limit, config.max_failures).await?;
            if ids.is_empty() {
                println!("No articles pending");
            } else {
                for id in ids {
                    println!("{}", id);
                }
            }
        }

        Some("--show") => {
            let id: i64 = args
                .get(2)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("--show requires an article id"))?;
            let article = repo
                .get_article(id)
                .await?
                .ok_or(AppError::ArticleNotFound(id))?;

            let mut tiers = serde_json::Map::new();
            for difficulty in Difficulty::ALL {
                tiers.insert(
                    difficulty.as_str().to_string(),
                    serde_json::json!({
                        "keywords": repo.get_keywords(id, difficulty).await?,
                        "questions": repo.get_questions(id, difficulty).await?,
                        "background_reading": repo.get_background(id, difficulty).await?,
                        "comments": repo.get_comments(id, difficulty).await?,
                    }),
                );
            }
            let bundle = serde_json::json!({
                "article": article,
                "summaries": repo.get_summaries(id).await?,
                "tiers": tiers,
            });
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }

        Some("--status") => {
            let counts = repo.counts(config.max_failures).await?;
            println!("Articles: {} total", counts.total);
            println!("  pending:     {}", counts.pending);
            println!("  in progress: {}", counts.in_progress);
            println!("  processed:   {}", counts.processed);
            println!("  exhausted:   {}", counts.exhausted);
        }

        Some("--add") => {
            let (Some(url), Some(title)) = (args.get(2), args.get(3)) else {
                return Err(anyhow::anyhow!("--add requires a URL and a title").into());
            };
            let category_id = match args.get(4) {
                Some(name) => Some(repo.ensure_category(name).await?),
                None => None,
            };
            let inserted = repo
                .insert_article(NewArticle {
                    url: url.clone(),
                    title: title.clone(),
                    category_id,
                    ..Default::default()
                })
                .await?;
            match inserted {
                Some(id) => println!("Added article {}", id),
                None => println!("Article already exists: {}", url),
            }
        }

        _ => print_usage(),
    }

    Ok(())
}

fn print_usage() {
    println!("graded-news - leveled news enrichment pipeline");
    println!();
    println!("Usage:");
    println!("  graded-news --process [limit]       run one enrichment batch");
    println!("  graded-news --migrate               migrate legacy feedback rows");
    println!("  graded-news --reap [minutes]        release stale processing claims");
    println!("  graded-news --reset <article-id>    re-enable an exhausted article");
    println!("  graded-news --status                show processing counts");
    println!("  graded-news --pending [limit]       list articles eligible for processing");
    println!("  graded-news --show <article-id>     dump an article's content as JSON");
    println!("  graded-news --add <url> <title> [category]");
    println!("                                      insert one article");
}
