//! Space lifecycle: create, list, get, update, delete.
//!
//! Deletion cascades in compensating order (index entries first, then the
//! file tree, then the metadata rows) so a crash partway through leaves
//! nothing user-visible behind (items without metadata are unreachable).

use chrono::Utc;
use uuid::Uuid;

use crate::context::UserContext;
use crate::error::{Error, Result};
use crate::models::Space;

const MAX_NAME_CHARS: usize = 50;
const MAX_DESCRIPTION_CHARS: usize = 500;

pub async fn create_space(
    ctx: &UserContext,
    name: &str,
    description: Option<&str>,
) -> Result<Space> {
    validate_name(name)?;
    validate_description(description)?;

    let now = Utc::now();
    let space = Space {
        id: Uuid::new_v4().to_string(),
        user_id: ctx.user_id.clone(),
        name: name.trim().to_string(),
        description: description.map(|d| d.to_string()),
        created_at: now,
        updated_at: now,
        item_count: 0,
    };

    ctx.store.insert_space(&space).await?;
    Ok(space)
}

pub async fn list_spaces(ctx: &UserContext) -> Result<Vec<Space>> {
    ctx.store.list_spaces(&ctx.user_id).await
}

pub async fn get_space(ctx: &UserContext, space_id: &str) -> Result<Space> {
    let space = ctx.store.get_space(space_id).await?;
    if space.user_id != ctx.user_id {
        // Spaces are scoped per user; another user's id is indistinguishable
        // from a missing one.
        return Err(Error::NotFound(format!("space {}", space_id)));
    }
    Ok(space)
}

pub async fn update_space(
    ctx: &UserContext,
    space_id: &str,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<Space> {
    get_space(ctx, space_id).await?;

    if let Some(n) = name {
        validate_name(n)?;
    }
    validate_description(description)?;

    ctx.store
        .update_space(space_id, name.map(str::trim), description)
        .await
}

/// Delete a space and everything in it: vectors, uploaded bytes, items,
/// and query history.
pub async fn delete_space(ctx: &UserContext, space_id: &str) -> Result<()> {
    get_space(ctx, space_id).await?;

    // Vectors go first so no search can return items that are about to lose
    // their metadata.
    let item_ids = ctx.store.list_item_ids(space_id).await?;
    let mut removed_any = false;
    for item_id in &item_ids {
        removed_any |= ctx.index.delete(item_id)?;
    }
    if removed_any {
        ctx.index.persist()?;
    }

    let files_dir = ctx.space_files_dir(space_id);
    if files_dir.exists() {
        std::fs::remove_dir_all(&files_dir)?;
    }

    for item_id in &item_ids {
        ctx.store.remove_item_row(item_id).await?;
    }
    ctx.store.delete_space_rows(space_id).await
}

fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("space name is required".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(Error::InvalidInput(format!(
            "space name must be {} characters or less",
            MAX_NAME_CHARS
        )));
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> Result<()> {
    if let Some(d) = description {
        if d.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(Error::InvalidInput(format!(
                "description must be {} characters or less",
                MAX_DESCRIPTION_CHARS
            )));
        }
    }
    Ok(())
}
