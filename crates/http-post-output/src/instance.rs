//! Instance lifecycle and registry.
//!
//! An [`Instance`] owns one complete pipeline: the synchronous record stage
//! plus the spawned batcher and delivery workers and the queues between them.
//! Stages are linked only by those bounded queues, so shutdown is queue
//! closure: dropping the record sender stops the batcher once it drains,
//! dropping the batch sender stops the delivery worker, and
//! [`Instance::shutdown`] simply awaits both workers after the drop.
//!
//! The host process keeps instances in an [`InstanceRegistry`] keyed by the
//! configured instance id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::batcher::{BatchSettings, Batcher};
use crate::config::Config;
use crate::error::InitError;
use crate::flusher::Flusher;
use crate::http::build_client;
use crate::match_map::MatchTable;
use crate::pipeline::{Disposition, RecordPipeline};
use crate::record::FieldValue;

/// One running output target.
pub struct Instance {
    config: Arc<Config>,
    pipeline: RecordPipeline,
    batcher: JoinHandle<()>,
    flusher: JoinHandle<()>,
}

impl Instance {
    /// Validates the configuration, loads the match map, and spawns the
    /// batching and delivery workers.
    ///
    /// Must be called within a tokio runtime. Any configuration problem is
    /// fatal here; a started instance only ever drops individual records.
    pub fn start(config: Config) -> Result<Self, InitError> {
        config.validate()?;
        let config = Arc::new(config);

        let match_table = MatchTable::load(&config.match_map_file)?;

        // Both queues share the batch size as capacity: the pipeline can run
        // at most one full batch ahead of the batcher, and the batcher one
        // sealed batch ahead of delivery.
        let (record_tx, record_rx) = mpsc::channel(config.max_records);
        let (batch_tx, batch_rx) = mpsc::channel(config.max_records);

        let pipeline = RecordPipeline::new(Arc::clone(&config), match_table, record_tx)?;
        let flusher = Flusher::new(build_client()?, &config.post_url, &config.headers)?;
        let settings = BatchSettings {
            max_records: config.max_records,
            max_period: Duration::from_millis(config.max_period_ms),
            compress: config.gzip_body,
            flush_on_shutdown: config.flush_on_shutdown,
        };

        info!(
            id = %config.id,
            url = %config.post_url,
            max_records = config.max_records,
            max_period_ms = config.max_period_ms,
            gzip = config.gzip_body,
            match_map_file = %config.match_map_file,
            dedup = config.dedup_enabled(),
            "Starting output instance"
        );
        if !config.output_time_key.is_empty() {
            debug!(
                key = %config.output_time_key,
                now = %pipeline.formatted_now(),
                "Output time format check"
            );
        }

        let batcher = tokio::spawn(Batcher::new(settings, record_rx, batch_tx).run());
        let flusher = tokio::spawn(flusher.run(batch_rx));

        Ok(Instance {
            config,
            pipeline,
            batcher,
            flusher,
        })
    }

    /// The instance identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Processes one record; see [`RecordPipeline::process`].
    pub async fn process<I>(&mut self, raw: I, timestamp: DateTime<Utc>) -> Disposition
    where
        I: IntoIterator<Item = (String, FieldValue)>,
    {
        self.pipeline.process(raw, timestamp).await
    }

    /// Stops the instance and waits for both workers to exit.
    ///
    /// Closes the record queue, lets the batcher drain and close the batch
    /// queue in turn, then awaits the delivery worker. Whether the in-progress
    /// partial batch ships depends on `flush_on_shutdown`.
    pub async fn shutdown(self) {
        let Instance {
            config,
            pipeline,
            batcher,
            flusher,
        } = self;

        debug!(id = %config.id, "Shutting down output instance");
        drop(pipeline);
        if batcher.await.is_err() {
            error!(id = %config.id, "Batcher worker panicked");
        }
        if flusher.await.is_err() {
            error!(id = %config.id, "Delivery worker panicked");
        }
        info!(id = %config.id, "Output instance stopped");
    }
}

/// Running instances, keyed by instance id.
#[derive(Default)]
pub struct InstanceRegistry {
    instances: HashMap<String, Instance>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        InstanceRegistry::default()
    }

    /// Starts an instance from its configuration and registers it.
    ///
    /// A duplicate id is a fatal configuration error.
    pub fn register(&mut self, config: Config) -> Result<(), InitError> {
        if self.instances.contains_key(&config.id) {
            return Err(InitError::InvalidConfig(format!(
                "duplicate instance id '{}'",
                config.id
            )));
        }
        let instance = Instance::start(config)?;
        self.instances.insert(instance.id().to_string(), instance);
        Ok(())
    }

    /// The running instance with the given id, if any.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Instance> {
        self.instances.get_mut(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Shuts down and removes one instance. Returns false if the id is
    /// unknown.
    pub async fn shutdown(&mut self, id: &str) -> bool {
        match self.instances.remove(id) {
            Some(instance) => {
                instance.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Shuts down every remaining instance.
    pub async fn shutdown_all(&mut self) {
        for (_, instance) in self.instances.drain() {
            instance.shutdown().await;
        }
    }
}
