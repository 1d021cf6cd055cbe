//! Platform dispatch for worker construction.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Platform, RecorderBuilder, RecorderContext, StreamRegistry};
use crate::config::{RecorderConfig, ResolvedRecord};
use crate::scheduler::WorkerHandle;
use crate::{Error, Result};

/// Mapping from platform to the builder of its workers.
#[derive(Clone, Default)]
pub struct PlatformTable {
    builders: HashMap<Platform, Arc<dyn RecorderBuilder>>,
}

impl PlatformTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table that uses `builder` for every known platform.
    pub fn uniform(builder: Arc<dyn RecorderBuilder>) -> Self {
        let builders = Platform::all().map(|p| (p, builder.clone())).collect();
        Self { builders }
    }

    pub fn with(mut self, platform: Platform, builder: Arc<dyn RecorderBuilder>) -> Self {
        self.builders.insert(platform, builder);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<dyn RecorderBuilder>> {
        self.builders.get(&platform)
    }

    /// Known platforms with no registered builder.
    pub fn missing(&self) -> Vec<Platform> {
        Platform::all()
            .filter(|p| !self.builders.contains_key(p))
            .collect()
    }
}

impl std::fmt::Debug for PlatformTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut platforms: Vec<_> = self.builders.keys().map(Platform::as_ref).collect();
        platforms.sort_unstable();
        f.debug_struct("PlatformTable")
            .field("platforms", &platforms)
            .finish()
    }
}

/// Creates running workers from resolved records.
#[derive(Debug, Clone)]
pub struct WorkerFactory {
    table: PlatformTable,
    streams: StreamRegistry,
}

impl WorkerFactory {
    pub fn new(table: PlatformTable, streams: StreamRegistry) -> Self {
        Self { table, streams }
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    /// Build and spawn the worker for `record`.
    ///
    /// Fails with [`Error::UnsupportedPlatform`] for an unknown or
    /// unregistered platform tag and with [`Error::WorkerCreation`] if the
    /// builder rejects the record. Nothing is spawned on failure.
    pub fn create(
        &self,
        config: Arc<RecorderConfig>,
        record: &ResolvedRecord,
        cancellation_token: CancellationToken,
    ) -> Result<WorkerHandle> {
        let identity = &record.identity;
        let platform = Platform::from_str(identity.platform())
            .map_err(|_| Error::UnsupportedPlatform(identity.platform().to_string()))?;
        let builder = self
            .table
            .get(platform)
            .ok_or_else(|| Error::UnsupportedPlatform(identity.platform().to_string()))?;

        let recorder = builder
            .build(RecorderContext {
                platform,
                config,
                record: record.clone(),
                streams: self.streams.clone(),
            })
            .map_err(|e| match e {
                e @ Error::WorkerCreation { .. } => e,
                other => Error::worker_creation(identity, other.to_string()),
            })?;

        debug!(%identity, "Spawning worker");
        Ok(WorkerHandle::spawn(
            identity.clone(),
            recorder,
            cancellation_token,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Identity;
    use crate::recorder::{Recorder, RecorderOutcome, RecorderResult};
    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl Recorder for Idle {
        async fn run(self: Box<Self>, cancel: CancellationToken) -> RecorderResult {
            cancel.cancelled().await;
            Ok(RecorderOutcome::Cancelled)
        }
    }

    struct IdleBuilder;

    impl RecorderBuilder for IdleBuilder {
        fn build(&self, _ctx: RecorderContext) -> Result<Box<dyn Recorder>> {
            Ok(Box::new(Idle))
        }
    }

    struct RejectingBuilder;

    impl RecorderBuilder for RejectingBuilder {
        fn build(&self, _ctx: RecorderContext) -> Result<Box<dyn Recorder>> {
            Err(Error::config("missing cookie"))
        }
    }

    fn factory(table: PlatformTable) -> WorkerFactory {
        WorkerFactory::new(table, StreamRegistry::new())
    }

    #[test]
    fn test_missing_platforms() {
        let table = PlatformTable::new().with(Platform::Twitch, Arc::new(IdleBuilder));
        assert_eq!(table.missing().len(), 12);
        assert!(!table.missing().contains(&Platform::Twitch));
        assert!(PlatformTable::uniform(Arc::new(IdleBuilder)).missing().is_empty());
    }

    #[tokio::test]
    async fn test_create_spawns_worker() {
        let factory = factory(PlatformTable::uniform(Arc::new(IdleBuilder)));
        let record = ResolvedRecord::new(Identity::new("Huya", "u3"), "u3");
        let token = CancellationToken::new();

        let handle = factory
            .create(Arc::default(), &record, token.clone())
            .unwrap();
        assert_eq!(handle.identity(), &record.identity);
        assert!(!handle.is_finished());
        handle.request_stop();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_unsupported_platform() {
        let factory = factory(PlatformTable::new().with(Platform::Twitch, Arc::new(IdleBuilder)));

        let unknown = ResolvedRecord::new(Identity::new("Kick", "x"), "x");
        let err = factory
            .create(Arc::default(), &unknown, CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlatform(p) if p == "Kick"));

        let unregistered = ResolvedRecord::new(Identity::new("Huya", "x"), "x");
        let err = factory
            .create(Arc::default(), &unregistered, CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlatform(_)));
    }

    #[tokio::test]
    async fn test_builder_failure_is_creation_error() {
        let factory = factory(PlatformTable::uniform(Arc::new(RejectingBuilder)));
        let record = ResolvedRecord::new(Identity::new("Twitch", "u2"), "u2");

        let err = factory
            .create(Arc::default(), &record, CancellationToken::new())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to create worker for Twitch:u2: Configuration error: missing cookie"
        );
    }
}
