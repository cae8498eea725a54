//! One enrichment batch: claim eligible articles, generate, validate,
//! normalize, and record the outcome per article.
//!
//! Failures are isolated per article. A payload that fails validation or a
//! transaction that aborts marks that one article failed and the batch
//! moves on; retry happens when a later run selects the article again.

use std::future::Future;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::ai::{validate, ValidationMode};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::Article;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Articles at the failure cap, skipped until an operator reset.
    pub skipped_exhausted: i64,
}

/// `generate` produces the raw payload for one article, normally by
/// calling the enrichment API. It is injected so the batch logic does not
/// depend on the network.
pub async fn run_batch<F, Fut>(
    repo: &Repository,
    limit: usize,
    max_failures: u32,
    mode: ValidationMode,
    generate: F,
) -> Result<RunReport>
where
    F: Fn(Article) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let counts = repo.counts(max_failures).await?;
    let ids = repo.claim_next(limit, max_failures).await?;

    let mut report = RunReport {
        selected: ids.len(),
        skipped_exhausted: counts.exhausted,
        ..Default::default()
    };

    for id in ids {
        match process_article(repo, id, mode, &generate).await {
            Ok(()) => {
                repo.record_success(id, Utc::now()).await?;
                report.succeeded += 1;
            }
            Err(e) => {
                warn!("article {} failed: {}", id, e);
                repo.record_failure(id, &e.to_string()).await?;
                report.failed += 1;
            }
        }
    }

    info!(
        "batch done: {} selected, {} succeeded, {} failed, {} exhausted",
        report.selected, report.succeeded, report.failed, report.skipped_exhausted
    );
    Ok(report)
}

async fn process_article<F, Fut>(
    repo: &Repository,
    id: i64,
    mode: ValidationMode,
    generate: &F,
) -> Result<()>
where
    F: Fn(Article) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let article = repo
        .get_article(id)
        .await?
        .ok_or(AppError::ArticleNotFound(id))?;

    let raw = generate(article).await?;
    let payload =
        validate(&raw, mode).map_err(|reasons| AppError::Validation(reasons.join("; ")))?;

    for warning in &payload.warnings {
        warn!("article {}: {}", id, warning);
    }

    repo.apply_response(id, payload).await?;
    Ok(())
}
