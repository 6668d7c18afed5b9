//! Explicit dependency injection, replacing global singletons (logger,
//! config, db client) per the design notes: every component takes a
//! `Context` rather than reaching for ambient state.

use crate::image_intake::ImageExtractor;
use crate::notifier::NotifierHandle;
use orchestrator_common::clock::Clock;
use orchestrator_common::config::AppConfig;
use sqlx::PgPool;
use std::sync::Arc;

/// `Context { db, queue, clock, logger, config }` from the design notes: the
/// one piece of shared state every component takes by reference instead of
/// reaching for a global. `queue` is `notifier`, the only outbound queue the
/// core owns directly (the event/workflow "queues" are rows in `db`);
/// `logger` is the ambient `tracing` subscriber, configured once in `main`
/// and not threaded explicitly since every component already emits spans
/// through the global dispatcher. `image_extractor` is the same kind of
/// external collaborator as `notifier` — swapped for a disabled stand-in
/// when its credential is absent, per `AppConfig::image_extraction_url`.
#[derive(Clone)]
pub struct Context {
    pub db: PgPool,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<AppConfig>,
    pub notifier: NotifierHandle,
    pub image_extractor: Arc<dyn ImageExtractor>,
}

impl Context {
    #[must_use]
    pub fn new(
        db: PgPool,
        clock: Arc<dyn Clock>,
        config: Arc<AppConfig>,
        notifier: NotifierHandle,
        image_extractor: Arc<dyn ImageExtractor>,
    ) -> Self {
        Self { db, clock, config, notifier, image_extractor }
    }
}
