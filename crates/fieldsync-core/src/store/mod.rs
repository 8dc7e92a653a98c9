//! Local storage: geometry containers, dataset layout, and sidecars.

mod container;
mod dataset;
mod geometry;

pub use container::SqliteContainer;
pub use dataset::{
    list_local_datasets, read_sidecar, write_sidecar, DatasetLayout, LocalDataset, SIDECAR_NAME,
};
pub use geometry::{
    parse_snapshot, GeometryStore, SourceFeature, StatusCounts, SYNC_FIELDS, UPLOAD_FIELDS,
};
