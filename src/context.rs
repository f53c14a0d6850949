use std::sync::Arc;

use crate::adapters;
use crate::config::AppConfig;
use crate::core::controller::{ControllerSettings, ImportController};
use crate::core::importer::BatchImporter;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub importer: Arc<dyn BatchImporter>,
}

impl AppContext {
    /// Context with the importer selected by `config.simulation`.
    pub fn new(config: AppConfig) -> Self {
        let importer = adapters::create_importer(&config);
        Self::with_importer(config, importer)
    }

    pub fn with_importer(config: AppConfig, importer: Arc<dyn BatchImporter>) -> Self {
        Self {
            config: Arc::new(config),
            importer,
        }
    }

    /// A fresh controller over this context's importer.
    pub fn controller(&self) -> Arc<ImportController> {
        Arc::new(ImportController::new(
            Arc::clone(&self.importer),
            ControllerSettings::from(self.config.as_ref()),
        ))
    }
}
