//! Semantic search over saved items.
//!
//! Both entry points embed the query text and run it against the user's
//! vector index; the difference is the scope filter. Hits are hydrated
//! against the metadata store afterwards; an item deleted between search
//! and hydrate simply drops out of the results, which is expected under
//! concurrency, not an error.

use std::collections::HashMap;

use crate::context::UserContext;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::index::IndexHit;
use crate::models::SearchHit;

/// Clamp a requested K to the allowed 1..=20 range, defaulting from config.
pub fn effective_k(ctx: &UserContext, k: Option<usize>) -> usize {
    k.unwrap_or(ctx.config.retrieval.k_default).clamp(1, 20)
}

/// Top-K items of one space ranked by similarity to `text`.
pub async fn search_in_space(
    ctx: &UserContext,
    space_id: &str,
    text: &str,
    k: Option<usize>,
    deadline: &Deadline,
) -> Result<Vec<SearchHit>> {
    ctx.store.get_space(space_id).await?;
    let query = validate_query(text)?;
    let k = effective_k(ctx, k);

    deadline.check()?;
    let q_vec = ctx.embedder.embed(query, deadline).await?;
    let hits = ctx.index.search(&q_vec, space_id, k)?;
    hydrate_hits(ctx, hits).await
}

/// Top-K items across every space of the user.
pub async fn global_search(
    ctx: &UserContext,
    text: &str,
    k: Option<usize>,
    deadline: &Deadline,
) -> Result<Vec<SearchHit>> {
    let query = validate_query(text)?;
    let k = effective_k(ctx, k);

    deadline.check()?;
    let q_vec = ctx.embedder.embed(query, deadline).await?;
    let hits = ctx.index.global_search(&q_vec, k)?;
    hydrate_hits(ctx, hits).await
}

fn validate_query(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("search text cannot be empty".to_string()));
    }
    Ok(trimmed)
}

/// Join index hits with their metadata rows, keeping retrieval order and
/// dropping ids whose item vanished in between.
async fn hydrate_hits(ctx: &UserContext, hits: Vec<IndexHit>) -> Result<Vec<SearchHit>> {
    let ids: Vec<String> = hits.iter().map(|h| h.item_id.clone()).collect();
    let items = ctx.store.hydrate(&ids).await?;
    let mut by_id: HashMap<String, crate::models::Item> =
        items.into_iter().map(|i| (i.id.clone(), i)).collect();

    Ok(hits
        .into_iter()
        .filter_map(|hit| {
            by_id.remove(&hit.item_id).map(|item| SearchHit {
                item,
                score: hit.score,
            })
        })
        .collect())
}
