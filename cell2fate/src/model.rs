use crate::anndata::AnnData;
use crate::config::{ExportConfig, ModelConfig, SampleKwargs, TrainArgs};
use crate::diagnostics::{reconstruct, ReconstructionQc, SummaryStat};
use crate::engine::Cell2fateEngine;
use crate::error::{Cell2fateError, Result};
use crate::export::{write_posterior, PosteriorExporter};
use crate::normalize::normalize;
use crate::plot::{history_windows, reconstruction_plots, PlotSequence};
use crate::registry::DataRegistry;
use crate::sampler::PosteriorSampleSet;
use crate::sites::ModelDims;
use crate::traits::{Sampler, Trainer};

use log::info;
use rand::Rng;

/// Registered data, an inference engine, and what came out of it
///
/// Training, sampling, export and plotting are delegated to the
/// engine, the exporter and the plot helpers; the model only keeps
/// their results between calls.
pub struct Cell2fateModel<E: Trainer + Sampler = Cell2fateEngine> {
    registry: DataRegistry,
    engine: E,
    exporter: PosteriorExporter,
    samples: Option<PosteriorSampleSet>,
    history: Vec<f32>,
}

impl Cell2fateModel<Cell2fateEngine> {
    /// A model with a fresh parameter store sized to `registry`
    pub fn new(registry: DataRegistry, config: ModelConfig) -> Result<Self> {
        let dims = ModelDims::from(registry.summary_stats());
        let engine = Cell2fateEngine::new(dims, config)?;
        Ok(Self::with_engine(registry, engine))
    }
}

impl<E: Trainer + Sampler> Cell2fateModel<E> {
    pub fn with_engine(registry: DataRegistry, engine: E) -> Self {
        let exporter = PosteriorExporter::new(engine.model_name());
        Self {
            registry,
            engine,
            exporter,
            samples: None,
            history: vec![],
        }
    }

    /// Forget learned parameters, training history and cached samples
    pub fn reset_params(&mut self) -> Result<()> {
        self.engine.reset_params()?;
        self.history.clear();
        self.samples = None;
        Ok(())
    }

    /// Fit the posterior; returns the ELBO per cell of every epoch
    pub fn train(&mut self, args: &TrainArgs) -> Result<&[f32]> {
        let history = self.engine.train(&self.registry, args)?;
        self.history = history;
        self.samples = None;
        Ok(&self.history)
    }

    pub fn sample_posterior(&self, kwargs: &SampleKwargs) -> Result<PosteriorSampleSet> {
        self.engine.sample_posterior(&self.registry, kwargs)
    }

    /// Sample the posterior, keep the samples and annotate `adata`
    pub fn export_posterior(&mut self, adata: &mut AnnData, config: &ExportConfig) -> Result<()> {
        let samples = self.sample_posterior(&config.sample_kwargs)?;
        self.samples = Some(samples);
        self.export_cached(adata, config)
    }

    /// Annotate `adata` from the samples kept by the last
    /// [`Cell2fateModel::export_posterior`]
    pub fn export_cached(&self, adata: &mut AnnData, config: &ExportConfig) -> Result<()> {
        let samples = self.cached_samples()?;
        write_posterior(adata, &self.registry, samples, config, &self.exporter)?;
        info!("exported the posterior to uns[{:?}]", config.export_slot);
        Ok(())
    }

    /// Write `unspliced_norm` and `spliced_norm` from the cached
    /// posterior means
    pub fn normalize(&self, adata: &mut AnnData) -> Result<()> {
        let samples = self.cached_samples()?;
        normalize(samples.post_sample_means(), &self.registry, adata)
    }

    /// Expected against observed counts on `use_n_obs` random cells
    pub fn reconstruction_qc<R: Rng + ?Sized>(
        &self,
        stat: SummaryStat,
        use_n_obs: Option<usize>,
        rng: &mut R,
    ) -> Result<ReconstructionQc> {
        let samples = self.samples.as_ref().ok_or_else(|| {
            Cell2fateError::Precondition(
                "no posterior samples; call export_posterior first".into(),
            )
        })?;
        reconstruct(samples.stat(stat), &self.registry, use_n_obs, rng)
    }

    /// Reconstruction accuracy plots, unspliced and spliced
    pub fn plot_qc<R: Rng + ?Sized>(
        &self,
        stat: SummaryStat,
        use_n_obs: Option<usize>,
        rng: &mut R,
    ) -> Result<PlotSequence> {
        let qc = self.reconstruction_qc(stat, use_n_obs, rng)?;
        info!(
            "{} reconstruction, log1p correlation: unspliced {:.3}, spliced {:.3}",
            stat, qc.correlation[0], qc.correlation[1]
        );
        Ok(reconstruction_plots(&qc))
    }

    /// Training history at four zoom levels
    pub fn view_history(&self) -> Result<PlotSequence> {
        if self.history.is_empty() {
            return Err(Cell2fateError::Precondition(
                "no training history; train the model first".into(),
            ));
        }
        Ok(history_windows(&self.history, self.history.len()))
    }

    fn cached_samples(&self) -> Result<&PosteriorSampleSet> {
        self.samples.as_ref().ok_or_else(|| {
            Cell2fateError::Precondition(
                "no cached posterior samples; call export_posterior first".into(),
            )
        })
    }

    pub fn history(&self) -> &[f32] {
        &self.history
    }

    pub fn samples(&self) -> Option<&PosteriorSampleSet> {
        self.samples.as_ref()
    }

    pub fn registry(&self) -> &DataRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn is_trained(&self) -> bool {
        self.engine.is_trained()
    }

    pub fn summary_string(&self) -> String {
        let stats = self.registry.summary_stats();
        format!(
            "{} with the following params:\nn_cells: {}, n_genes: {}, n_batch: {}",
            self.engine.model_name(),
            stats.n_cells,
            stats.n_vars,
            stats.n_batch
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anndata::{Layer, UnsEntry};
    use crate::config::SetupArgs;
    use crate::registry::setup_anndata;
    use crate::sites::*;
    use matrix_param::summary::SiteMap;
    use matrix_util::traits::RowsToDense;
    use ndarray::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Returns the same fixed summary every time
    struct FixedEngine {
        dims: ModelDims,
        trained: bool,
    }

    impl FixedEngine {
        fn sites(&self, value: f32) -> SiteMap {
            let mut ret = SiteMap::new();
            for site in GLOBAL_SITES.iter().chain(LOCAL_SITES.iter()) {
                if let Some(shape) = self.dims.site_shape(site) {
                    ret.insert((*site).into(), ArrayD::from_elem(IxDyn(&shape), value));
                }
            }
            ret
        }
    }

    impl Trainer for FixedEngine {
        fn train(&mut self, _: &DataRegistry, args: &TrainArgs) -> Result<Vec<f32>> {
            self.trained = true;
            let n = args.max_epochs.unwrap_or(16);
            Ok((0..n).map(|e| -100.0 / (e + 1) as f32).collect())
        }

        fn reset_params(&mut self) -> Result<()> {
            self.trained = false;
            Ok(())
        }

        fn is_trained(&self) -> bool {
            self.trained
        }
    }

    impl Sampler for FixedEngine {
        fn sample_posterior(&self, _: &DataRegistry, kwargs: &SampleKwargs) -> Result<PosteriorSampleSet> {
            if !self.trained {
                return Err(Cell2fateError::Precondition("untrained".into()));
            }
            let mut ret = PosteriorSampleSet::default();
            ret.summary.means = self.sites(1.0);
            ret.summary.stds = self.sites(0.1);
            ret.summary.q05 = self.sites(0.8);
            ret.summary.q95 = self.sites(1.2);
            if kwargs.return_samples {
                let mut draws = SiteMap::new();
                for (site, x) in self.sites(1.0) {
                    let stacked = ndarray::stack(Axis(0), &[x.view(), x.view()])?;
                    draws.insert(site, stacked);
                }
                ret.posterior_samples = Some(draws);
            }
            Ok(ret)
        }

        fn model_name(&self) -> &str {
            "FixedEngine"
        }
    }

    fn toy() -> anyhow::Result<(AnnData, Cell2fateModel<FixedEngine>)> {
        let mut adata = AnnData::with_default_names(6, 3)?;
        let counts = Array2::from_shape_fn((6, 3), |(i, j)| (i * j % 4) as f32);
        adata.set_layer("unspliced", Layer::Dense(counts.clone()))?;
        adata.set_layer("spliced", Layer::Dense(counts))?;
        let registry = setup_anndata(&mut adata, &SetupArgs::default())?;
        let engine = FixedEngine {
            dims: ModelDims::from(registry.summary_stats()),
            trained: false,
        };
        Ok((adata, Cell2fateModel::with_engine(registry, engine)))
    }

    fn no_normalize() -> ExportConfig {
        ExportConfig {
            normalize: false,
            ..Default::default()
        }
    }

    #[test]
    fn nothing_before_training() -> anyhow::Result<()> {
        let (mut adata, mut model) = toy()?;
        let mut rng = StdRng::seed_from_u64(0);

        assert!(matches!(
            model.export_posterior(&mut adata, &no_normalize()),
            Err(Cell2fateError::Precondition(_))
        ));
        assert!(matches!(
            model.plot_qc(SummaryStat::Means, Some(3), &mut rng),
            Err(Cell2fateError::Precondition(_))
        ));
        assert!(matches!(
            model.view_history(),
            Err(Cell2fateError::Precondition(_))
        ));
        assert!(matches!(
            model.normalize(&mut adata),
            Err(Cell2fateError::Precondition(_))
        ));

        model.train(&TrainArgs::default())?;
        assert_eq!(model.view_history()?.len(), 4);
        assert!(matches!(
            model.plot_qc(SummaryStat::Means, Some(3), &mut rng),
            Err(Cell2fateError::Precondition(_))
        ));
        Ok(())
    }

    #[test]
    fn cached_export_is_idempotent() -> anyhow::Result<()> {
        let (mut adata, mut model) = toy()?;
        model.train(&TrainArgs::default())?;
        model.export_posterior(&mut adata, &no_normalize())?;

        let first_velocity = adata.layer("velocity").map(|x| x.to_dense());
        let first_time = adata.obs("latent_time_mean").cloned();

        model.export_cached(&mut adata, &no_normalize())?;
        assert_eq!(
            adata.layer("velocity").map(|x| x.to_dense()),
            first_velocity
        );
        assert_eq!(adata.obs("latent_time_mean").cloned(), first_time);
        assert!(adata.layer("unspliced_norm").is_none());

        let record = adata
            .uns("mod")
            .and_then(UnsEntry::as_record)
            .ok_or_else(|| anyhow::anyhow!("no record"))?;
        assert_eq!(record.model_name.as_ref(), "FixedEngine");
        assert_eq!(record.obs_names.len(), 6);
        assert_eq!(record.var_names.len(), 3);
        Ok(())
    }

    #[test]
    fn raw_samples_and_velocity_posterior() -> anyhow::Result<()> {
        let (mut adata, mut model) = toy()?;
        model.train(&TrainArgs::default())?;

        let mut config = no_normalize();
        config.full_velocity_posterior = true;
        model.export_posterior(&mut adata, &config)?;
        assert!(adata.uns("velocity_posterior").is_none());

        config.sample_kwargs.return_samples = true;
        config.export_slot = "cell2fate".into();
        model.export_posterior(&mut adata, &config)?;

        let v = adata
            .uns("velocity_posterior")
            .and_then(UnsEntry::as_array)
            .ok_or_else(|| anyhow::anyhow!("no velocity posterior"))?;
        assert_eq!(v.shape(), &[2, 6, 3]);

        let record = adata
            .uns("cell2fate")
            .and_then(UnsEntry::as_record)
            .ok_or_else(|| anyhow::anyhow!("no record"))?;
        assert!(record.post_samples.is_some());
        Ok(())
    }

    #[test]
    fn qc_and_history_plots() -> anyhow::Result<()> {
        let (mut adata, mut model) = toy()?;
        model.train(&TrainArgs {
            max_epochs: Some(40),
            ..Default::default()
        })?;
        model.export_posterior(&mut adata, &ExportConfig::default())?;
        assert!(adata.layer("spliced_norm").is_some());

        let mut rng = StdRng::seed_from_u64(3);
        let qc = model.plot_qc(SummaryStat::Q95, Some(100), &mut rng)?;
        assert_eq!(qc.ncols, 3);
        assert_eq!(qc.len(), 2);
        assert_eq!(qc.plots[1].title(), "Reconstruction Accuracy (spliced)");

        let history = model.view_history()?;
        assert_eq!(history.ncols, 4);
        assert_eq!(history.plots[3].title(), "ELBO from epoch 20");

        assert!(model.summary_string().ends_with("n_batch: 1"));

        model.reset_params()?;
        assert!(model.samples().is_none());
        assert!(model.history().is_empty());
        assert!(!model.is_trained());
        Ok(())
    }
}
