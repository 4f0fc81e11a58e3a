//! Forecast alignment pipeline: grid generation, normalization, merge,
//! validation, and run orchestration.

pub mod grid;
pub mod merge;
pub mod normalize;
pub mod runner;
pub mod validate;

pub use grid::build_grid;
pub use merge::{GapFillPolicy, MergeEngine, MergePolicies};
pub use normalize::{
    DisaggregationPolicy, DropCounts, NormalizedSources, SourceNormalizer, SourceSchema,
    SourceSeries,
};
pub use runner::{Pipeline, RunResult};
pub use validate::{AcceptanceConfig, ColumnAcceptance, CompletenessValidator, CoverageReport};
