pub mod datecode;
pub mod gap_fill;
pub mod horizon;
pub mod merger;
pub mod metadata;
pub mod meter_loader;
pub mod models;
pub mod store;

pub use horizon::{horizon_key, HorizonTable, HorizonTransposer};
pub use merger::merge_series;
pub use metadata::{join_metadata, load_allocations, Allocation, Category, MetadataTable};
pub use meter_loader::MeterLoader;
pub use models::{FileStats, MergedTable, NormalizedSeries, PipelineConfig, RawReading};
pub use store::{StoreMode, TableStore};
