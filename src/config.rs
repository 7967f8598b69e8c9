use std::{path::PathBuf, time::Duration};

use media_store::StoreConfig;

pub const DEFAULT_PUBLISH_STEPS: u32 = 100;
pub const DEFAULT_PUBLISH_STEP_DELAY: Duration = Duration::from_millis(20);

/// Shape of the simulated publish phase that follows a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishSettings {
    pub steps: u32,
    pub step_delay: Duration,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            steps: DEFAULT_PUBLISH_STEPS,
            step_delay: DEFAULT_PUBLISH_STEP_DELAY,
        }
    }
}

/// Everything lives under one data root:
/// `<root>/storage`, `<root>/processing` and `<root>/index.db`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    data_dir: PathBuf,
    publish: PublishSettings,
}

impl AppConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            publish: PublishSettings::default(),
        }
    }

    pub fn with_publish(mut self, publish: PublishSettings) -> Self {
        self.publish = publish;
        self
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.join("storage")
    }

    pub fn processing_dir(&self) -> PathBuf {
        self.data_dir.join("processing")
    }

    pub fn index_url(&self) -> String {
        self.data_dir.join("index.db").to_string_lossy().into_owned()
    }

    pub fn publish(&self) -> PublishSettings {
        self.publish
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            storage_dir: self.storage_dir(),
            processing_dir: self.processing_dir(),
            index_url: self.index_url(),
        }
    }
}
