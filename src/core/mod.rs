pub mod controller;
pub mod driver;
pub mod events;
pub mod handshake;
pub mod importer;
pub mod models;
pub mod phase;
pub mod progress;
pub mod retry;
pub mod selection;

pub use controller::{ControllerError, ControllerSettings, ImportController, StateInfo};
pub use events::ImportEvent;
pub use importer::{BatchChannels, BatchImporter, PasswordFileControl};
pub use models::{ImportError, ImportJob, ImportResult, ImportSummary};
pub use phase::ImportPhase;
pub use progress::ImportProgress;
pub use retry::{RetryRequest, RetryStrategy};
