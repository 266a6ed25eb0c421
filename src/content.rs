//! Item ingestion and lifecycle: save, list, delete.
//!
//! Save operations run the full pipeline synchronously: the item is
//! embedded and indexed before the call returns:
//!
//! ```text
//! insert(pending) → [write bytes] → extract → embed → index.add → mark ready
//! ```
//!
//! The vector is written last among persistent state (apart from the cheap
//! status flip), so a crash mid-pipeline never leaves a live vector without
//! a matching item. Failures after the pending insert trigger compensating
//! cleanup:
//!
//! - intrinsic extraction failures (unsupported / corrupt / empty /
//!   too-large) mark the item `failed` with the reason recorded, no
//!   vector, no extracted text;
//! - transient failures (backend unavailable, deadline) remove every trace
//!   of the item so the caller can retry.
//!
//! Deletes are self-compensating: index entry first, then file bytes, then
//! the metadata row. A crash between the steps leaves nothing reachable.

use chrono::Utc;
use serde_json::Map;
use uuid::Uuid;

use crate::context::UserContext;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::extract;
use crate::models::{Item, ItemDetails, ItemKind, ItemStatus, MimeFamily};

/// Save a text message into a space. Returns the ready item.
pub async fn save_message(
    ctx: &UserContext,
    space_id: &str,
    text: &str,
    notes: Option<&str>,
    deadline: &Deadline,
) -> Result<Item> {
    ctx.store.get_space(space_id).await?;

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("message text cannot be empty".to_string()));
    }
    if trimmed.chars().count() > ctx.config.limits.max_message_chars {
        return Err(Error::InvalidInput(format!(
            "message exceeds {} characters",
            ctx.config.limits.max_message_chars
        )));
    }

    let item = Item {
        id: Uuid::new_v4().to_string(),
        space_id: space_id.to_string(),
        kind: ItemKind::Message,
        content: trimmed.to_string(),
        details: ItemDetails::Message { extra: Map::new() },
        notes: notes.map(|n| n.to_string()),
        created_at: Utc::now(),
        status: ItemStatus::Pending,
        failure_reason: None,
        vector_ref: None,
        extracted_text: None,
    };

    ctx.store.insert_item_pending(&item).await?;

    let embed_input = embedding_text(trimmed, notes);
    match index_item(ctx, &item, &embed_input, None, deadline).await {
        Ok(ready) => Ok(ready),
        Err(e) => {
            // Message ingestion has no intrinsic failure mode; anything
            // that went wrong rolls the item back entirely.
            remove_all_traces(ctx, &item).await;
            Err(e)
        }
    }
}

/// Save an uploaded file into a space: store the bytes, extract text,
/// embed, and index. Returns the item in its final state: `ready`, or
/// `failed` when the content itself cannot be used.
pub async fn save_file(
    ctx: &UserContext,
    space_id: &str,
    bytes: &[u8],
    declared_mime: &str,
    original_name: &str,
    notes: Option<&str>,
    deadline: &Deadline,
) -> Result<Item> {
    ctx.store.get_space(space_id).await?;

    if original_name.trim().is_empty() {
        return Err(Error::InvalidInput("file name cannot be empty".to_string()));
    }
    // Size policy runs before anything is inserted or written: a too-large
    // upload leaves no trace at all.
    if bytes.len() > ctx.config.limits.max_file_bytes {
        return Err(Error::Extraction(crate::error::ExtractError::TooLarge {
            size: bytes.len(),
            limit: ctx.config.limits.max_file_bytes,
        }));
    }

    let family = MimeFamily::classify(declared_mime, original_name);
    let item_id = Uuid::new_v4().to_string();
    let ext = sanitized_extension(original_name);
    let storage_ref = ctx.storage_ref(space_id, &item_id, ext.as_deref());

    let item = Item {
        id: item_id,
        space_id: space_id.to_string(),
        kind: ItemKind::File,
        content: storage_ref.clone(),
        details: ItemDetails::File {
            original_name: original_name.to_string(),
            size_bytes: bytes.len() as u64,
            mime: family,
            ocr: family == MimeFamily::Image,
            extra: Map::new(),
        },
        notes: notes.map(|n| n.to_string()),
        created_at: Utc::now(),
        status: ItemStatus::Pending,
        failure_reason: None,
        vector_ref: None,
        extracted_text: None,
    };

    ctx.store.insert_item_pending(&item).await?;

    let file_path = ctx.resolve_storage_ref(&storage_ref);
    if let Err(e) = write_file_bytes(&file_path, bytes) {
        remove_all_traces(ctx, &item).await;
        return Err(e);
    }

    let text = match extract::extract_text(bytes, family, ctx.config.limits.max_file_bytes) {
        Ok(text) => text,
        Err(extract_err) => {
            // Intrinsic to the input: the item stays, marked failed, with
            // the reason recorded. The original bytes remain addressable.
            let reason = extract_err.to_string();
            ctx.store.mark_item_failed(&item.id, &reason).await?;
            return ctx.store.get_item(&item.id).await;
        }
    };

    let embed_input = embedding_text(&text, notes);
    match index_item(ctx, &item, &embed_input, Some(&text), deadline).await {
        Ok(ready) => Ok(ready),
        Err(e) => {
            remove_all_traces(ctx, &item).await;
            Err(e)
        }
    }
}

/// List a space's items, newest first.
pub async fn list_items(
    ctx: &UserContext,
    space_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Item>> {
    ctx.store.get_space(space_id).await?;
    ctx.store.list_items(space_id, limit.max(0), offset.max(0)).await
}

/// Delete one item: index entry first, then file bytes, then the row.
/// Deleting an id that is already gone is success.
pub async fn delete_item(ctx: &UserContext, space_id: &str, item_id: &str) -> Result<()> {
    ctx.store.get_space(space_id).await?;

    let item = match ctx.store.get_item(item_id).await {
        Ok(item) => item,
        Err(Error::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e),
    };
    if item.space_id != space_id {
        return Err(Error::NotFound(format!("item {} in space {}", item_id, space_id)));
    }

    if ctx.index.delete(item_id)? {
        ctx.index.persist()?;
    }

    if item.kind == ItemKind::File {
        let path = ctx.resolve_storage_ref(&item.content);
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }
    }

    ctx.store.remove_item_row(item_id).await
}

// ============ Pipeline internals ============

/// Embedding input for an already-stored item; used by full reindex.
pub fn reindex_text(item: &Item) -> String {
    embedding_text(item.body_text(), item.notes.as_deref())
}

/// What actually gets embedded: the body text plus the user's notes.
fn embedding_text(body: &str, notes: Option<&str>) -> String {
    match notes {
        Some(n) if !n.trim().is_empty() => format!("{} | Notes: {}", body, n.trim()),
        _ => body.to_string(),
    }
}

/// Embed → index.add → persist → mark ready. Used by both save paths once
/// the text is in hand.
async fn index_item(
    ctx: &UserContext,
    item: &Item,
    embed_input: &str,
    extracted_text: Option<&str>,
    deadline: &Deadline,
) -> Result<Item> {
    deadline.check()?;
    let embedding = ctx.embedder.embed(embed_input, deadline).await?;

    let vector_ref = ctx.index.add(&item.id, embedding, &item.space_id)?;

    if let Err(e) = ctx.index.persist() {
        let _ = ctx.index.delete(&item.id);
        return Err(e);
    }

    if let Err(e) = ctx
        .store
        .mark_item_ready(&item.id, vector_ref as i64, extracted_text)
        .await
    {
        let _ = ctx.index.delete(&item.id);
        let _ = ctx.index.persist();
        return Err(e);
    }

    ctx.store.get_item(&item.id).await
}

/// Compensating cleanup for transient failures: the indexed vector (if
/// any), the file bytes (if any), and the metadata row all go, so the
/// caller can retry from scratch.
async fn remove_all_traces(ctx: &UserContext, item: &Item) {
    if let Ok(true) = ctx.index.delete(&item.id) {
        let _ = ctx.index.persist();
    }
    if item.kind == ItemKind::File {
        let path = ctx.resolve_storage_ref(&item.content);
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }
    }
    let _ = ctx.store.remove_item_row(&item.id).await;
}

fn write_file_bytes(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Keep only a short alphanumeric extension; anything else is dropped.
fn sanitized_extension(name: &str) -> Option<String> {
    let ext = name.rsplit('.').next()?;
    if ext == name || ext.is_empty() || ext.len() > 8 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
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

    async fn make_space(ctx: &UserContext) -> String {
        spaces::create_space(ctx, "Test space", None).await.unwrap().id
    }

    #[tokio::test]
    async fn save_message_completes_ingestion() {
        let (_dir, ctx) = test_ctx().await;
        let space_id = make_space(&ctx).await;

        let item = save_message(&ctx, &space_id, "The Airbnb cost 18500", None, &Deadline::none())
            .await
            .unwrap();

        assert_eq!(item.status, ItemStatus::Ready);
        assert!(item.vector_ref.is_some());
        assert_eq!(ctx.index.len(), 1);
    }

    #[tokio::test]
    async fn save_empty_message_is_invalid() {
        let (_dir, ctx) = test_ctx().await;
        let space_id = make_space(&ctx).await;

        assert!(matches!(
            save_message(&ctx, &space_id, "   ", None, &Deadline::none()).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(ctx.store.list_items(&space_id, 10, 0).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn save_message_to_unknown_space_is_not_found() {
        let (_dir, ctx) = test_ctx().await;
        assert!(matches!(
            save_message(&ctx, "ghost", "hello", None, &Deadline::none()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn oversized_file_leaves_no_trace() {
        let (_dir, ctx) = test_ctx().await;
        let space_id = make_space(&ctx).await;

        let big = vec![b'a'; ctx.config.limits.max_file_bytes + 1];
        let err = save_file(
            &ctx,
            &space_id,
            &big,
            "text/plain",
            "big.txt",
            None,
            &Deadline::none(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Extraction(crate::error::ExtractError::TooLarge { .. })
        ));
        assert!(list_items(&ctx, &space_id, 10, 0).await.unwrap().is_empty());
        assert!(!ctx.space_files_dir(&space_id).exists());
    }

    #[tokio::test]
    async fn save_text_file_extracts_and_indexes() {
        let (_dir, ctx) = test_ctx().await;
        let space_id = make_space(&ctx).await;

        let item = save_file(
            &ctx,
            &space_id,
            b"trip notes: flight lands at 2pm",
            "text/plain",
            "notes.txt",
            None,
            &Deadline::none(),
        )
        .await
        .unwrap();

        assert_eq!(item.status, ItemStatus::Ready);
        assert_eq!(
            item.extracted_text.as_deref(),
            Some("trip notes: flight lands at 2pm")
        );
        assert!(ctx.resolve_storage_ref(&item.content).exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_marked_failed_without_vector() {
        let (_dir, ctx) = test_ctx().await;
        let space_id = make_space(&ctx).await;

        let item = save_file(
            &ctx,
            &space_id,
            &[0xff, 0xfe, 0x00, 0x01],
            "text/plain",
            "garbled.txt",
            None,
            &Deadline::none(),
        )
        .await
        .unwrap();

        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.vector_ref.is_none());
        assert!(item.failure_reason.unwrap().starts_with("corrupt"));
        assert_eq!(ctx.index.len(), 0);
    }

    #[tokio::test]
    async fn unknown_format_is_marked_failed() {
        let (_dir, ctx) = test_ctx().await;
        let space_id = make_space(&ctx).await;

        let item = save_file(
            &ctx,
            &space_id,
            b"whatever",
            "application/octet-stream",
            "blob.bin",
            None,
            &Deadline::none(),
        )
        .await
        .unwrap();

        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.failure_reason.unwrap().starts_with("unsupported"));
    }

    #[tokio::test]
    async fn delete_item_removes_vector_bytes_and_row() {
        let (_dir, ctx) = test_ctx().await;
        let space_id = make_space(&ctx).await;

        let item = save_file(
            &ctx,
            &space_id,
            b"to be deleted",
            "text/plain",
            "gone.txt",
            None,
            &Deadline::none(),
        )
        .await
        .unwrap();
        let path = ctx.resolve_storage_ref(&item.content);
        assert!(path.exists());

        delete_item(&ctx, &space_id, &item.id).await.unwrap();

        assert!(!path.exists());
        assert_eq!(ctx.index.len(), 0);
        assert!(list_items(&ctx, &space_id, 10, 0).await.unwrap().is_empty());

        // Second delete is success-by-default.
        delete_item(&ctx, &space_id, &item.id).await.unwrap();
    }

    #[tokio::test]
    async fn expired_deadline_rolls_message_back() {
        let (_dir, ctx) = test_ctx().await;
        let space_id = make_space(&ctx).await;

        let deadline = Deadline::after(std::time::Duration::from_millis(0));
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        let err = save_message(&ctx, &space_id, "too late", None, &deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));

        // No trace: transient failures roll back entirely.
        assert!(list_items(&ctx, &space_id, 10, 0).await.unwrap().is_empty());
        assert_eq!(ctx.index.len(), 0);
    }

    #[test]
    fn extension_sanitizing() {
        assert_eq!(sanitized_extension("a.pdf"), Some("pdf".to_string()));
        assert_eq!(sanitized_extension("archive.tar.GZ"), Some("gz".to_string()));
        assert_eq!(sanitized_extension("noext"), None);
        assert_eq!(sanitized_extension("trailing."), None);
        assert_eq!(sanitized_extension("weird.e!xt"), None);
    }
}
