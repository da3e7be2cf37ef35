pub mod anndata;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod export;
pub mod kinetics;
pub mod model;
pub mod normalize;
pub mod plot;
pub mod registry;
pub mod sampler;
pub mod sites;
pub mod traits;
pub mod velocity;

pub use anndata::{AnnData, Column, Layer, SlotUpdate, UnsEntry};
pub use config::{ExportConfig, ModelConfig, SampleKwargs, SetupArgs, TrainArgs};
pub use diagnostics::SummaryStat;
pub use error::{Cell2fateError, Result};
pub use model::Cell2fateModel;
pub use registry::{setup_anndata, DataRegistry};
pub use sampler::PosteriorSampleSet;
