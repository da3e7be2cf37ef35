use crate::anndata::{AnnData, Column, Layer, SlotUpdate, UnsEntry};
use crate::config::ExportConfig;
use crate::error::{Cell2fateError, Result};
use crate::normalize::stage_normalized;
use crate::registry::DataRegistry;
use crate::sampler::PosteriorSampleSet;
use crate::sites::*;
use crate::traits::Exporter;
use crate::velocity::{compute_velocity, velocity_posterior};

use log::{info, warn};
use matrix_param::io::to_parquet;
use matrix_param::summary::SiteMap;
use matrix_util::common_io::{mkdir, open_buf_writer};
use serde::Serialize;
use std::io::Write;

/// Everything `export_posterior` stores under `uns[export_slot]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRecord {
    pub model_name: Box<str>,
    /// `YYYY-MM-DD`
    pub date: Box<str>,
    pub var_names: Vec<Box<str>>,
    pub obs_names: Vec<Box<str>>,
    pub post_sample_means: SiteMap,
    pub post_sample_stds: SiteMap,
    pub post_sample_q05: SiteMap,
    pub post_sample_q95: SiteMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_samples: Option<SiteMap>,
}

impl ExportRecord {
    pub fn to_json(&self, file: &str) -> Result<()> {
        mkdir(file)?;
        let mut writer = open_buf_writer(file)?;
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

/// Per-cell columns: (obs key prefix, site)
pub const OBS_EXPORTS: [(&str, &str); 3] = [
    ("latent_time", T_C),
    ("normalization_factor_unspliced", DETECTION_Y_CU),
    ("normalization_factor_spliced", DETECTION_Y_CS),
];

/// Per-gene columns: (var key prefix, site)
pub const VAR_EXPORTS: [(&str, &str); 5] = [
    ("transcription_rate", ALPHA_G),
    ("splicing_rate", BETA_G),
    ("degredation_rate", GAMMA_G),
    ("switchON_time", T_GON),
    ("switchOFF_time", T_GOFF),
];

/// Validates posterior summaries against the registered data and
/// packs them into an [`ExportRecord`]
#[derive(Debug, Clone)]
pub struct PosteriorExporter {
    model_name: Box<str>,
}

impl PosteriorExporter {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.into(),
        }
    }
}

impl Exporter for PosteriorExporter {
    fn export(&self, samples: &PosteriorSampleSet, registry: &DataRegistry) -> Result<ExportRecord> {
        let dims = ModelDims::from(registry.summary_stats());
        for sites in [
            samples.post_sample_means(),
            samples.post_sample_stds(),
            samples.post_sample_q05(),
            samples.post_sample_q95(),
        ] {
            dims.validate(sites)?;
        }

        Ok(ExportRecord {
            model_name: self.model_name.clone(),
            date: chrono::Local::now()
                .format("%Y-%m-%d")
                .to_string()
                .into_boxed_str(),
            var_names: registry.var_names().to_vec(),
            obs_names: registry.obs_names().to_vec(),
            post_sample_means: samples.post_sample_means().clone(),
            post_sample_stds: samples.post_sample_stds().clone(),
            post_sample_q05: samples.post_sample_q05().clone(),
            post_sample_q95: samples.post_sample_q95().clone(),
            post_samples: None,
        })
    }
}

fn site_column(sites: &SiteMap, site: &str) -> Result<Column> {
    let x = require(sites, site)?;
    Ok(Column::Numeric(x.iter().copied().collect()))
}

/// Write the export record, obs/var columns, velocity layers and,
/// when asked, the velocity posterior and normalized counts onto
/// `adata`
///
/// Everything is computed before the first slot is written, so a failed
/// export leaves `adata` as it was.
pub fn write_posterior<X: Exporter + ?Sized>(
    adata: &mut AnnData,
    registry: &DataRegistry,
    samples: &PosteriorSampleSet,
    config: &ExportConfig,
    exporter: &X,
) -> Result<()> {
    if adata.n_obs() != registry.obs_names().len() || adata.n_vars() != registry.var_names().len() {
        return Err(Cell2fateError::ShapeMismatch {
            site: "adata".into(),
            expected: vec![registry.obs_names().len(), registry.var_names().len()],
            found: vec![adata.n_obs(), adata.n_vars()],
        });
    }

    let mut record = exporter.export(samples, registry)?;
    let return_samples = config.sample_kwargs.return_samples;

    if return_samples {
        let draws = samples.posterior_samples.as_ref().ok_or_else(|| {
            Cell2fateError::Precondition("raw posterior samples were not kept".into())
        })?;
        ModelDims::from(registry.summary_stats()).validate_draws(draws)?;
        warn!(
            "saving ALL posterior samples; set return_samples = false to keep summary statistics only"
        );
        record.post_samples = Some(draws.clone());
    }

    let means = samples.post_sample_means();
    let stds = samples.post_sample_stds();
    let mut update = SlotUpdate::new();

    for (key, site) in OBS_EXPORTS {
        update.obs(&format!("{}_mean", key), site_column(means, site)?);
        update.obs(&format!("{}_sd", key), site_column(stds, site)?);
    }

    for (key, site) in VAR_EXPORTS {
        update.var(&format!("{}_mean", key), site_column(means, site)?);
        update.var(&format!("{}_sd", key), site_column(stds, site)?);
    }

    let (velocity, velocity_sd) = compute_velocity(means, stds)?;
    update.layer("velocity", Layer::Dense(velocity));
    update.layer("velocity_sd", Layer::Dense(velocity_sd));

    if config.full_velocity_posterior {
        match samples.posterior_samples.as_ref() {
            Some(draws) if return_samples => {
                warn!(
                    "saving ALL posterior samples of velocity in uns[\"velocity_posterior\"]; \
                     set return_samples = false or full_velocity_posterior = false to keep summary statistics only"
                );
                let v = velocity_posterior(draws)?;
                update.uns("velocity_posterior", UnsEntry::Array(v.into_dyn()));
            }
            _ => {
                warn!("full_velocity_posterior needs return_samples = true; skipped");
            }
        }
    }

    if config.normalize {
        info!("computing normalized counts from the posterior of technical variables");
        stage_normalized(means, registry, &mut update)?;
    }

    update.uns(&config.export_slot, UnsEntry::Record(Box::new(record)));
    adata.apply(update)
}

/// Write every summarised site to `{header}.{site}.parquet` in the
/// melted format, with cell, gene or batch names along its axes
pub fn write_summary_parquet(
    samples: &PosteriorSampleSet,
    registry: &DataRegistry,
    header: &str,
) -> Result<()> {
    let obs = registry.obs_names();
    let var = registry.var_names();
    let batch = registry.batch_categories()?;

    for site in samples.post_sample_means().keys() {
        let (rows, columns) = match site.as_ref() {
            T_C | DETECTION_Y_CU | DETECTION_Y_CS => (Some(obs), None),
            MU_RNAVELOCITY => (Some(obs), Some(var)),
            S_G_GENE_ADD => (Some(batch), Some(var)),
            ALPHA_G | BETA_G | GAMMA_G | T_GON | T_GOFF | DISPERSION_G => (Some(var), None),
            _ => (None, None),
        };
        let file = format!("{}.{}.parquet", header, site);
        to_parquet(&samples.summary, site, rows, columns, &file)?;
    }
    info!("wrote posterior summaries to {}.*.parquet", header);
    Ok(())
}
