//! Domain models for the checkout/edit/upload sync protocol.

mod batch;
mod catalog;
mod conflict;
mod feature;
mod session;
mod status;

pub use batch::{BatchStage, UploadBatch};
pub use catalog::CatalogItem;
pub use conflict::{ConflictDecision, ConflictItem, ConflictResolution, ConflictSet};
pub use feature::{FeatureRecord, FieldSpec, FieldType};
pub use session::CheckoutSession;
pub use status::SyncStatus;
