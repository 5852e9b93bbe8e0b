//! Service options, refreshed on an explicit schedule.

use std::sync::{Arc, RwLock};

use cfs_protocol::CfsOptions;
use serde_json::Value;

use crate::adapters::OptionsStore;
use crate::error::OperatorError;

pub struct OptionsCache {
    store: Arc<dyn OptionsStore>,
    current: RwLock<CfsOptions>,
}

impl OptionsCache {
    pub fn new(store: Arc<dyn OptionsStore>) -> Self {
        Self {
            store,
            current: RwLock::new(CfsOptions::default()),
        }
    }

    /// Snapshot of the last refreshed options.
    pub fn current(&self) -> CfsOptions {
        self.current.read().unwrap().clone()
    }

    /// Re-read options from the service, writing back any default it lacks.
    pub async fn refresh(&self) -> Result<CfsOptions, OperatorError> {
        let served = self.store.get_options().await?;
        let missing = CfsOptions::missing_defaults(&served);
        if !missing.is_empty() {
            let keys: Vec<_> = missing.keys().cloned().collect();
            tracing::info!(?keys, "patching missing option defaults");
            if let Err(err) = self.store.patch_options(&missing).await {
                tracing::warn!(%err, "failed to patch option defaults");
            }
        }

        let mut merged = CfsOptions::defaults();
        merged.extend(served);
        let options: CfsOptions = serde_json::from_value(Value::Object(merged))
            .map_err(|err| OperatorError::Cfs(format!("invalid options: {err}")))?;
        *self.current.write().unwrap() = options.clone();
        Ok(options)
    }
}
