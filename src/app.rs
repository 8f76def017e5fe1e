//! Process-wide shared services handed to every connection task: the
//! buffer pool, certificate cache, history repository, and the
//! configuration everything else reads from.
//!
//! Held behind one explicit struct rather than global statics, per
//! REDESIGN FLAGS' note against module-level singletons -- the teacher's
//! `ProxyServer` holds its `CertificateManager`/`HttpClient` the same
//! way, as fields constructed once in `ProxyServer::new` and cloned
//! (`Arc`) into every spawned connection task.

use crate::buffer_pool::BufferPool;
use crate::config::settings::ProxyConfig;
use crate::error::Result;
use crate::repository::{Repository, SqliteRepository};
use crate::tls::CertCache;
use std::sync::Arc;

pub struct AppContext {
    pub config: ProxyConfig,
    pub cert_cache: Arc<CertCache>,
    pub buffer_pool: Arc<BufferPool>,
    pub repository: Arc<dyn Repository>,
}

impl AppContext {
    pub async fn new(config: ProxyConfig) -> Result<Self> {
        let cert_cache = Arc::new(CertCache::new(config.tls.clone())?);
        let buffer_pool = Arc::new(BufferPool::new());
        let repository: Arc<dyn Repository> =
            Arc::new(SqliteRepository::connect(&config.repository.database_url).await?);

        Ok(Self {
            config,
            cert_cache,
            buffer_pool,
            repository,
        })
    }
}
