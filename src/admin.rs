//! Administrative maintenance: index compaction and full reindex.
//!
//! `reindex` exists because the embedding model identity is fixed once a
//! user's index has been built; switching models (or dimensions) requires
//! re-embedding every live item into a fresh structure.

use crate::content;
use crate::context::UserContext;
use crate::deadline::Deadline;
use crate::error::Result;

/// Outcome counters for an admin run.
#[derive(Debug, Clone, Copy)]
pub struct AdminReport {
    pub items: usize,
    pub tombstones_before: usize,
}

/// Rebuild the ANN payload from live entries, dropping tombstones.
pub fn compact(ctx: &UserContext) -> Result<AdminReport> {
    let report = AdminReport {
        items: ctx.index.len(),
        tombstones_before: ctx.index.tombstone_count(),
    };
    ctx.index.compact()?;
    Ok(report)
}

/// Re-embed every ready item with the configured backend and atomically
/// replace the index contents. Embeddings are generated up front so an
/// unavailable backend aborts before the old index is touched.
pub async fn reindex(ctx: &UserContext, deadline: &Deadline) -> Result<AdminReport> {
    let items = ctx.store.list_ready_items().await?;
    let report = AdminReport {
        items: items.len(),
        tombstones_before: ctx.index.tombstone_count(),
    };

    let texts: Vec<String> = items
        .iter()
        .map(|item| content::reindex_text(item))
        .collect();
    let vectors = if texts.is_empty() {
        Vec::new()
    } else {
        ctx.embedder.embed_batch(&texts, deadline).await?
    };

    ctx.index.clear()?;
    for (item, vector) in items.iter().zip(vectors.into_iter()) {
        let vector_ref = ctx.index.add(&item.id, vector, &item.space_id)?;
        ctx.store
            .mark_item_ready(&item.id, vector_ref as i64, item.extracted_text.as_deref())
            .await?;
    }
    ctx.index.persist()?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::search;
    use crate::spaces;

    async fn test_ctx() -> (tempfile::TempDir, UserContext) {
        let dir = tempfile::tempdir().unwrap();
        let toml_str = format!(
            "[storage]\ndata_root = \"{}\"\n[index]\ndims = 64\n",
            dir.path().display()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        let ctx = UserContext::open(&config, "tester").await.unwrap();
        (dir, ctx)
    }

    #[tokio::test]
    async fn reindex_rebuilds_search_results() {
        let (_dir, ctx) = test_ctx().await;
        let space = spaces::create_space(&ctx, "Trip", None).await.unwrap();
        let d = Deadline::none();

        content::save_message(&ctx, &space.id, "the airbnb receipt", None, &d)
            .await
            .unwrap();
        content::save_message(&ctx, &space.id, "flight itinerary", None, &d)
            .await
            .unwrap();

        let report = reindex(&ctx, &d).await.unwrap();
        assert_eq!(report.items, 2);
        assert_eq!(ctx.index.len(), 2);

        let hits = search::search_in_space(&ctx, &space.id, "airbnb receipt", None, &d)
            .await
            .unwrap();
        assert_eq!(hits[0].item.content, "the airbnb receipt");
    }

    #[tokio::test]
    async fn compact_reports_tombstones() {
        let (_dir, ctx) = test_ctx().await;
        let space = spaces::create_space(&ctx, "Trip", None).await.unwrap();
        let d = Deadline::none();

        let item = content::save_message(&ctx, &space.id, "short lived", None, &d)
            .await
            .unwrap();
        content::save_message(&ctx, &space.id, "kept", None, &d).await.unwrap();
        content::save_message(&ctx, &space.id, "also kept", None, &d)
            .await
            .unwrap();
        content::save_message(&ctx, &space.id, "kept too", None, &d)
            .await
            .unwrap();
        content::delete_item(&ctx, &space.id, &item.id).await.unwrap();

        // Ratio 1/4 triggered the inline compaction already.
        let report = compact(&ctx).unwrap();
        assert_eq!(report.tombstones_before, 0);
        assert_eq!(ctx.index.tombstone_count(), 0);
        assert_eq!(ctx.index.len(), 3);
    }
}
