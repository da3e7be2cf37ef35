use candle_util::candle_variational::NormalPrior;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Arguments of posterior sampling
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SampleKwargs {
    /// number of posterior draws
    pub num_samples: usize,
    /// number of cells per sampling minibatch
    pub batch_size: usize,
    pub use_gpu: bool,
    /// keep every raw draw next to the summary statistics
    pub return_samples: bool,
    pub seed: Option<u64>,
}

impl Default for SampleKwargs {
    fn default() -> Self {
        Self {
            num_samples: 1000,
            batch_size: 2048,
            use_gpu: false,
            return_samples: false,
            seed: None,
        }
    }
}

/// Arguments of `export_posterior`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    pub sample_kwargs: SampleKwargs,
    /// `uns` slot of the export record
    pub export_slot: String,
    /// also export per-draw velocity (needs `return_samples`)
    pub full_velocity_posterior: bool,
    /// add `unspliced_norm` and `spliced_norm` layers
    pub normalize: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sample_kwargs: SampleKwargs::default(),
            export_slot: "mod".to_string(),
            full_velocity_posterior: false,
            normalize: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrainArgs {
    /// `None`: `min(round(20000 / n_cells * 400), 400)`
    pub max_epochs: Option<usize>,
    /// cells per minibatch (0: the whole training set)
    pub batch_size: usize,
    /// fraction of cells used for gradient steps
    pub train_size: f32,
    pub lr: f32,
    pub use_gpu: bool,
    pub verbose: bool,
    pub seed: Option<u64>,
}

impl Default for TrainArgs {
    fn default() -> Self {
        Self {
            max_epochs: None,
            batch_size: 2500,
            train_size: 1.0,
            lr: 0.002,
            use_gpu: false,
            verbose: false,
            seed: None,
        }
    }
}

/// Default number of epochs given the number of cells
pub fn default_max_epochs(n_cells: usize) -> usize {
    let n = n_cells.max(1) as f64;
    ((20000.0 / n) * 400.0).round().min(400.0) as usize
}

/// Normal prior of an unconstrained variable
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PriorParams {
    pub mean: f64,
    pub std: f64,
}

impl PriorParams {
    pub fn new(mean: f64, std: f64) -> Self {
        Self { mean, std }
    }
}

impl From<PriorParams> for NormalPrior {
    fn from(p: PriorParams) -> Self {
        NormalPrior::new(p.mean, p.std)
    }
}

/// Prior hyper-parameters of the two-state kinetic model and the
/// initialisation of its variational guide
///
/// Rates, backgrounds, dispersions and detection efficiencies are
/// log-normal; switch-on and latent times are logistic-normal on
/// `[0, t_max]`; the on-duration is log-normal.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub t_max: f32,
    pub log_alpha: PriorParams,
    pub log_beta: PriorParams,
    pub log_gamma: PriorParams,
    pub logit_switch_on: PriorParams,
    pub log_duration: PriorParams,
    pub log_gene_add: PriorParams,
    pub log_dispersion: PriorParams,
    pub logit_latent_time: PriorParams,
    pub log_detection: PriorParams,
    /// initial standard deviation of the guide
    pub init_std: f64,
    /// jitter of the initial guide means
    pub init_jitter: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            t_max: 20.0,
            log_alpha: PriorParams::new(0.0, 1.0),
            log_beta: PriorParams::new(0.0, 1.0),
            log_gamma: PriorParams::new(0.0, 1.0),
            logit_switch_on: PriorParams::new(-1.0, 1.0),
            log_duration: PriorParams::new(5.0_f64.ln(), 1.0),
            log_gene_add: PriorParams::new(0.1_f64.ln(), 1.0),
            log_dispersion: PriorParams::new(10.0_f64.ln(), 1.0),
            logit_latent_time: PriorParams::new(0.0, 1.5),
            log_detection: PriorParams::new(0.0, 0.5),
            init_std: 0.1,
            init_jitter: 0.01,
        }
    }
}

/// Arguments of `setup_anndata`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SetupArgs {
    pub unspliced_label: String,
    pub spliced_label: String,
    /// categorical obs column; `None` puts every cell in one batch
    pub batch_key: Option<String>,
    pub labels_key: Option<String>,
    pub validate_counts: bool,
}

impl Default for SetupArgs {
    fn default() -> Self {
        Self {
            unspliced_label: "unspliced".to_string(),
            spliced_label: "spliced".to_string(),
            batch_key: None,
            labels_key: None,
            validate_counts: true,
        }
    }
}

/// Read any of the configuration structs from a JSON file; missing
/// fields take their defaults
pub fn read_json_config<T>(file: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let reader = matrix_util::common_io::open_buf_reader(file)?;
    Ok(serde_json::from_reader(reader)?)
}
