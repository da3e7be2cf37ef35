use crate::config::{SampleKwargs, TrainArgs};
use crate::error::Result;
use crate::export::ExportRecord;
use crate::plot::PlotDescriptor;
use crate::registry::DataRegistry;
use crate::sampler::PosteriorSampleSet;

/// Fits the variational posterior to registered data
pub trait Trainer {
    /// Run stochastic variational inference and return the per-epoch
    /// ELBO (per cell)
    fn train(&mut self, registry: &DataRegistry, args: &TrainArgs) -> Result<Vec<f32>>;

    /// Discard every learned parameter
    fn reset_params(&mut self) -> Result<()>;

    fn is_trained(&self) -> bool;
}

/// Draws from the fitted variational posterior
pub trait Sampler {
    fn sample_posterior(
        &self,
        registry: &DataRegistry,
        kwargs: &SampleKwargs,
    ) -> Result<PosteriorSampleSet>;

    fn model_name(&self) -> &str;
}

/// Turns posterior samples into an export record
pub trait Exporter {
    fn export(&self, samples: &PosteriorSampleSet, registry: &DataRegistry) -> Result<ExportRecord>;
}

/// Consumes plot descriptors one at a time
pub trait Plotter {
    /// * `index` - position of the plot in its sequence
    fn render(&mut self, index: usize, plot: &PlotDescriptor) -> anyhow::Result<()>;

    /// Lay out everything rendered so far in `ncols` columns
    fn flush(&mut self, ncols: usize) -> anyhow::Result<()>;
}
