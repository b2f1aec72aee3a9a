use std::sync::Arc;

use sqlx::PgPool;
use stream_protocol::BlobStore;

use crate::blob::FsBlobStore;
use crate::config::Config;
use crate::engine::actor::ActorRegistry;
use crate::engine::longpoll::LongPollRegistry;
use crate::engine::operation::Engine;
use crate::engine::read::ReadCoalescer;
use crate::engine::sse::SseBroadcaster;
use crate::repo::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub engine: Engine,
    pub reads: Arc<ReadCoalescer>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, blob_root: impl Into<std::path::PathBuf>) -> Self {
        let storage = Storage::new(pool);
        let blob_store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(blob_root));
        let config = Arc::new(config);

        let engine = Engine {
            storage: storage.clone(),
            actors: Arc::new(ActorRegistry::new()),
            long_poll: Arc::new(LongPollRegistry::new()),
            sse: Arc::new(SseBroadcaster::new()),
            blob_store,
            rotation_threshold_bytes: config.segment_max_bytes,
            rotation_threshold_messages: config.segment_max_messages as u64,
            fanout_threshold: config.fanout_subscriber_threshold,
        };

        AppState {
            storage,
            reads: Arc::new(ReadCoalescer::new(config.read_coalesce_window())),
            engine,
            config,
        }
    }
}
