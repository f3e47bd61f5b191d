//! Heartlink - Incremental sync of wearable vitals and ECG recordings
//!
//! Heartlink turns physiological samples from a platform health source into
//! FHIR R4 transaction bundles and uploads them to a clinical data store:
//! classification → ECG digitization → resource mapping → bundle assembly →
//! transport. A persisted watermark decides what is new and only advances
//! once the store has accepted the whole bundle.
//!
//! ## Modules
//!
//! - **Pipeline**: `classifier`, `digitizer`, `mapper`, `bundle`
//! - **Boundaries**: `source` (health data in), `transport` and `query` (clinical store),
//!   `settings_store` (watermark and patient id)
//! - **Controller**: `sync` drives one pass at a time, cancellable at every await

pub mod bundle;
pub mod cancel;
pub mod classifier;
pub mod coding;
pub mod config;
pub mod digitizer;
pub mod error;
pub mod fhir;
pub mod mapper;
pub mod query;
pub mod settings_store;
pub mod source;
pub mod sync;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use bundle::BundleBuilder;
pub use cancel::CancelToken;
pub use error::{SourceError, SyncError, TransportError};
pub use sync::{SyncController, SyncOutcome, SyncState, SyncStatus};

// Boundary exports
pub use query::{ObservationQuery, ObservationReference};
pub use settings_store::{FileSettingsStore, MemorySettingsStore, SettingsStore};
pub use source::{ExportFileSource, HealthSource, MemorySource};
pub use transport::{HttpTransport, Transport};

/// Heartlink version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported in the user agent
pub const PRODUCER_NAME: &str = "heartlink";
