//! Per-user application context.
//!
//! The pipeline's shared services are explicit dependencies, owned here and
//! passed by reference into each operation, never module-level singletons.
//! Opening a context lays out (or reopens) the user's directory:
//!
//! ```text
//! <data_root>/<user_id>/
//! ├── kb.sqlite        # metadata database
//! ├── index.bin        # vector index snapshot
//! └── files/<space_id>/<item_id>.<ext>   # uploaded bytes
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::hnsw::HnswParams;
use crate::index::VectorIndex;
use crate::llm::{self, LlmClient};
use crate::migrate;
use crate::store::MetadataStore;

/// Everything one user's request tasks need.
pub struct UserContext {
    pub user_id: String,
    pub config: Config,
    pub store: MetadataStore,
    pub index: Arc<VectorIndex>,
    pub embedder: Arc<Embedder>,
    pub llm: Arc<dyn LlmClient>,
    user_root: PathBuf,
}

impl UserContext {
    /// Open (creating on first use) the context for `user_id`.
    pub async fn open(config: &Config, user_id: &str) -> Result<Self> {
        if user_id.is_empty() || user_id.contains(['/', '\\', '.']) {
            return Err(Error::InvalidInput(format!("invalid user id '{}'", user_id)));
        }

        let user_root = config.storage.data_root.join(user_id);

        let pool = db::open_user_db(&user_root)
            .await
            .map_err(|e| Error::Internal(format!("open database: {}", e)))?;
        migrate::run_migrations(&pool)
            .await
            .map_err(|e| Error::Internal(format!("migrations: {}", e)))?;

        let params = HnswParams::new(
            config.index.hnsw_m,
            config.index.hnsw_ef_construction,
            config.index.hnsw_ef_search,
        );
        let index = VectorIndex::open(
            user_root.join("index.bin"),
            config.index.dims,
            params,
            config.index.compact_threshold,
        )?;

        let embedder = Embedder::from_config(&config.embedding, config.index.dims)?;
        let llm = llm::create_client(&config.llm)?;

        Ok(Self {
            user_id: user_id.to_string(),
            config: config.clone(),
            store: MetadataStore::new(pool),
            index: Arc::new(index),
            embedder: Arc::new(embedder),
            llm: Arc::from(llm),
            user_root,
        })
    }

    /// Relative storage reference for an uploaded item's bytes; this exact
    /// string is recorded as the item's `content` and later resolved via
    /// [`resolve_storage_ref`](Self::resolve_storage_ref).
    pub fn storage_ref(&self, space_id: &str, item_id: &str, ext: Option<&str>) -> String {
        match ext {
            Some(e) => format!("files/{}/{}.{}", space_id, item_id, e),
            None => format!("files/{}/{}", space_id, item_id),
        }
    }

    /// Path of a space's file directory (removed wholesale on cascade).
    pub fn space_files_dir(&self, space_id: &str) -> PathBuf {
        self.user_root.join("files").join(space_id)
    }

    /// Resolve a stored content reference (relative to the user root).
    pub fn resolve_storage_ref(&self, storage_ref: &str) -> PathBuf {
        self.user_root.join(storage_ref)
    }
}
