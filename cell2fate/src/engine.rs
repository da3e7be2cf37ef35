//! Stochastic variational inference of the two-state kinetic model.
//!
//! Every latent site is a deterministic transform of an unconstrained
//! Gaussian variable with a mean-field Gaussian guide. Cell-level
//! variables are gathered per minibatch by the registered cell index.

use crate::config::{default_max_epochs, ModelConfig, PriorParams, TrainArgs};
use crate::error::{Cell2fateError, Result};
use crate::kinetics::mu_rna_velocity_tensor;
use crate::registry::DataRegistry;
use crate::sites::{ModelDims, NUM_MODALITIES};
use crate::traits::Trainer;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use candle_util::candle_inference::{select_device, TrainConfig};
use candle_util::candle_loss_functions::negative_binomial_likelihood;
use candle_util::candle_variational::GaussianVar;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{info, warn};
use matrix_util::ndarray_util::one_hot_membership;
use matrix_util::traits::{ConvertMatOps, RowsToDense};
use matrix_util::utils::{generate_minibatch_intervals, split_train_validation};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

fn lock_error<E>(_: E) -> Cell2fateError {
    Cell2fateError::Precondition("parameter store lock poisoned".into())
}

/// Variational parameters of every site, on the unconstrained scale
pub(crate) struct Guide {
    pub(crate) log_alpha: GaussianVar,
    pub(crate) log_beta: GaussianVar,
    pub(crate) log_gamma: GaussianVar,
    pub(crate) logit_switch_on: GaussianVar,
    pub(crate) log_duration: GaussianVar,
    pub(crate) log_gene_add: GaussianVar,
    pub(crate) log_dispersion: GaussianVar,
    pub(crate) logit_latent_time: GaussianVar,
    pub(crate) log_detection_u: GaussianVar,
    pub(crate) log_detection_s: GaussianVar,
}

impl Guide {
    /// Create the variables in `varmap`, or pick up the existing ones
    fn new(varmap: &VarMap, device: &Device, dims: &ModelDims, config: &ModelConfig) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        let (c, g, b) = (dims.n_cells, dims.n_genes, dims.n_batch);
        let (jitter, sd) = (config.init_jitter, config.init_std);

        let var = |name: &str, shape: &[usize], prior: &PriorParams| {
            GaussianVar::new(vb.pp(name), shape, prior.mean, jitter, sd)
        };

        Ok(Self {
            log_alpha: var("log_alpha", &[g], &config.log_alpha)?,
            log_beta: var("log_beta", &[g], &config.log_beta)?,
            log_gamma: var("log_gamma", &[g], &config.log_gamma)?,
            logit_switch_on: var("logit_switch_on", &[g], &config.logit_switch_on)?,
            log_duration: var("log_duration", &[g], &config.log_duration)?,
            log_gene_add: var("log_gene_add", &[b, g, NUM_MODALITIES], &config.log_gene_add)?,
            log_dispersion: var("log_dispersion", &[g, NUM_MODALITIES], &config.log_dispersion)?,
            logit_latent_time: var("logit_latent_time", &[c], &config.logit_latent_time)?,
            log_detection_u: var("log_detection_u", &[c], &config.log_detection)?,
            log_detection_s: var("log_detection_s", &[c], &config.log_detection)?,
        })
    }

    fn global_kl(&self, config: &ModelConfig) -> Result<Tensor> {
        let terms = [
            self.log_alpha.kl_div(&config.log_alpha.into())?,
            self.log_beta.kl_div(&config.log_beta.into())?,
            self.log_gamma.kl_div(&config.log_gamma.into())?,
            self.logit_switch_on.kl_div(&config.logit_switch_on.into())?,
            self.log_duration.kl_div(&config.log_duration.into())?,
            self.log_gene_add.kl_div(&config.log_gene_add.into())?,
            self.log_dispersion.kl_div(&config.log_dispersion.into())?,
        ];
        Ok(Tensor::stack(&terms, 0)?.sum_all()?)
    }
}

/// Registered data as device tensors
struct TrainData {
    unspliced: Tensor,
    spliced: Tensor,
    batch_onehot: Tensor,
    index: Vec<u32>,
}

impl TrainData {
    fn new(registry: &DataRegistry, dims: &ModelDims, device: &Device) -> Result<Self> {
        let all: Vec<usize> = (0..dims.n_cells).collect();
        let unspliced = registry.unspliced()?.rows_to_dense(&all)?.to_tensor(device)?;
        let spliced = registry.spliced()?.rows_to_dense(&all)?.to_tensor(device)?;
        let batch_onehot =
            one_hot_membership(registry.batch_codes()?, dims.n_batch)?.to_tensor(device)?;

        let index = registry
            .indices()?
            .iter()
            .map(|&i| {
                if i < 0 || i as usize >= dims.n_cells {
                    Err(Cell2fateError::InvalidArgument(format!(
                        "registered cell index {} out of range",
                        i
                    )))
                } else {
                    Ok(i as u32)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            unspliced,
            spliced,
            batch_onehot,
            index,
        })
    }
}

/// The two-state kinetic model with its mean-field guide
pub struct Cell2fateEngine {
    pub(crate) dims: ModelDims,
    pub(crate) config: ModelConfig,
    pub(crate) device: Device,
    pub(crate) varmap: VarMap,
    pub(crate) guide: Guide,
    pub(crate) trained: bool,
}

impl Cell2fateEngine {
    /// A fresh engine with its own parameter store
    pub fn new(dims: ModelDims, config: ModelConfig) -> Result<Self> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let guide = Guide::new(&varmap, &device, &dims, &config)?;
        Ok(Self {
            dims,
            config,
            device,
            varmap,
            guide,
            trained: false,
        })
    }

    pub fn dims(&self) -> &ModelDims {
        &self.dims
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Number of trainable tensors
    pub fn num_param_tensors(&self) -> usize {
        self.varmap.all_vars().len()
    }

    pub(crate) fn check_dims(&self, registry: &DataRegistry) -> Result<()> {
        let dims = ModelDims::from(registry.summary_stats());
        if dims != self.dims {
            return Err(Cell2fateError::ShapeMismatch {
                site: "registry".into(),
                expected: vec![self.dims.n_cells, self.dims.n_genes, self.dims.n_batch],
                found: vec![dims.n_cells, dims.n_genes, dims.n_batch],
            });
        }
        Ok(())
    }

    /// Move every variational parameter to `device`
    fn to_device(&mut self, device: &Device) -> Result<()> {
        if self.device.same_device(device) {
            return Ok(());
        }
        let varmap = VarMap::new();
        {
            let src = self.varmap.data().lock().map_err(lock_error)?;
            let mut dst = varmap.data().lock().map_err(lock_error)?;
            for (name, var) in src.iter() {
                let moved = Var::from_tensor(&var.as_tensor().to_device(device)?)?;
                dst.insert(name.clone(), moved);
            }
        }
        self.guide = Guide::new(&varmap, device, &self.dims, &self.config)?;
        self.varmap = varmap;
        self.device = device.clone();
        Ok(())
    }

    /// z = μ + σ ε with host-generated standard normal ε
    fn draw(&self, var: &GaussianVar, rng: &mut StdRng) -> Result<Tensor> {
        let dims = var.mean().dims().to_vec();
        let n: usize = dims.iter().product();
        let eps: Vec<f32> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
        let eps = Tensor::from_vec(eps, dims, &self.device)?;
        Ok(var.rsample_with(&eps)?)
    }

    /// Single-draw ELBO estimate on a minibatch of cells
    ///
    /// * `rows` - positions of the cells in the registered data
    /// * `scale` - weight of the cell-level terms (cells / minibatch cells)
    fn elbo(&self, rows: &[usize], data: &TrainData, scale: f64, rng: &mut StdRng) -> Result<Tensor> {
        let g = &self.guide;
        let (ngenes, nbatch) = (self.dims.n_genes, self.dims.n_batch);
        let ncells = rows.len();
        let t_max = self.config.t_max as f64;

        let idx: Vec<u32> = rows.iter().map(|&r| data.index[r]).collect();
        let idx = Tensor::from_vec(idx, ncells, &self.device)?;

        // gene-level sites
        let alpha = self.draw(&g.log_alpha, rng)?.exp()?;
        let beta = self.draw(&g.log_beta, rng)?.exp()?;
        let gamma = self.draw(&g.log_gamma, rng)?.exp()?;
        let t_on = (candle_nn::ops::sigmoid(&self.draw(&g.logit_switch_on, rng)?)? * t_max)?;
        let t_off = (&t_on + self.draw(&g.log_duration, rng)?.exp()?)?;
        let gene_add = self.draw(&g.log_gene_add, rng)?.exp()?;
        let dispersion = self.draw(&g.log_dispersion, rng)?.exp()?;

        // cell-level sites
        let latent_time = g.logit_latent_time.select_rows(&idx)?;
        let detection_u = g.log_detection_u.select_rows(&idx)?;
        let detection_s = g.log_detection_s.select_rows(&idx)?;

        let t_c = (candle_nn::ops::sigmoid(&self.draw(&latent_time, rng)?)? * t_max)?;
        let detection = Tensor::stack(
            &[
                self.draw(&detection_u, rng)?.exp()?,
                self.draw(&detection_s, rng)?.exp()?,
            ],
            1,
        )?
        .reshape((ncells, 1, NUM_MODALITIES))?;

        let mu_rna = mu_rna_velocity_tensor(&alpha, &beta, &gamma, &t_on, &t_off, &t_c)?;
        let background = data
            .batch_onehot
            .index_select(&idx, 0)?
            .matmul(&gene_add.reshape((nbatch, ngenes * NUM_MODALITIES))?)?
            .reshape((ncells, ngenes, NUM_MODALITIES))?;
        let mu = (mu_rna + background)?.broadcast_mul(&detection)?;

        let mut llik = Tensor::zeros((), DType::F32, &self.device)?;
        for (m, y) in [&data.unspliced, &data.spliced].into_iter().enumerate() {
            let y_m = y.index_select(&idx, 0)?;
            let mu_m = mu.narrow(2, m, 1)?.squeeze(2)?;
            let r_m = dispersion.narrow(1, m, 1)?.reshape((1, ngenes))?;
            let llik_m = negative_binomial_likelihood(&y_m, &mu_m, &r_m)?.sum_all()?;
            llik = (llik + llik_m)?;
        }

        let local_kl = ((latent_time.kl_div(&self.config.logit_latent_time.into())?
            + detection_u.kl_div(&self.config.log_detection.into())?)?
            + detection_s.kl_div(&self.config.log_detection.into())?)?;

        let global_kl = g.global_kl(&self.config)?;

        Ok((((llik - local_kl)? * scale)? - global_kl)?)
    }

    fn fit(
        &self,
        data: &TrainData,
        train_idx: &mut [usize],
        valid_idx: &[usize],
        train_config: &TrainConfig,
        rng: &mut StdRng,
    ) -> Result<Vec<f32>> {
        let mut adam = AdamW::new(
            self.varmap.all_vars(),
            ParamsAdamW {
                lr: train_config.learning_rate as f64,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        let pb = ProgressBar::new(train_config.num_epochs as u64);
        if !train_config.show_progress || train_config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let ntrain = train_idx.len();
        let norm = (ntrain * self.dims.n_genes.max(1)) as f64;
        let mut elbo_trace = Vec::with_capacity(train_config.num_epochs);

        for epoch in 0..train_config.num_epochs {
            train_idx.shuffle(rng);
            let intervals = generate_minibatch_intervals(ntrain, train_config.batch_size);

            let mut elbo_tot = 0_f32;
            for &(lb, ub) in intervals.iter() {
                let rows = &train_idx[lb..ub];
                let scale = ntrain as f64 / rows.len() as f64;
                let elbo = self.elbo(rows, data, scale, rng)?;
                let loss = (elbo.neg()? / norm)?;
                adam.backward_step(&loss)?;
                elbo_tot += elbo.to_scalar::<f32>()?;
            }

            let elbo_per_cell = elbo_tot / intervals.len().max(1) as f32 / ntrain as f32;
            if !elbo_per_cell.is_finite() {
                warn!("[{}] non-finite ELBO", epoch + 1);
            }
            elbo_trace.push(elbo_per_cell);
            pb.inc(1);

            if !valid_idx.is_empty() {
                let held_out = self.elbo(valid_idx, data, 1.0, rng)?.to_scalar::<f32>()?;
                if train_config.verbose {
                    info!(
                        "[{}] ELBO per cell: {} (held-out: {})",
                        epoch + 1,
                        elbo_per_cell,
                        held_out / valid_idx.len() as f32
                    );
                }
            } else if train_config.verbose {
                info!("[{}] ELBO per cell: {}", epoch + 1, elbo_per_cell);
            }
        }
        pb.finish_and_clear();
        Ok(elbo_trace)
    }
}

impl Trainer for Cell2fateEngine {
    fn train(&mut self, registry: &DataRegistry, args: &TrainArgs) -> Result<Vec<f32>> {
        self.check_dims(registry)?;

        let n_cells = self.dims.n_cells;
        if n_cells == 0 {
            return Err(Cell2fateError::InvalidArgument("no cells to train on".into()));
        }
        if !(args.train_size > 0.0 && args.train_size <= 1.0) {
            return Err(Cell2fateError::InvalidArgument(format!(
                "train_size must be in (0, 1], got {}",
                args.train_size
            )));
        }

        let device = select_device(args.use_gpu)?;
        self.to_device(&device)?;

        let num_epochs = args.max_epochs.unwrap_or_else(|| default_max_epochs(n_cells));
        let mut rng = seeded_rng(args.seed);
        let (mut train_idx, valid_idx) = split_train_validation(n_cells, args.train_size, &mut rng);

        let batch_size = if args.batch_size == 0 {
            train_idx.len()
        } else {
            args.batch_size
        };

        info!(
            "training on {} cells ({} held out) for {} epochs, minibatch size {}",
            train_idx.len(),
            valid_idx.len(),
            num_epochs,
            batch_size
        );

        let train_config = TrainConfig {
            learning_rate: args.lr,
            batch_size,
            num_epochs,
            device: device.clone(),
            verbose: args.verbose,
            show_progress: true,
        };

        let data = TrainData::new(registry, &self.dims, &device)?;
        let trace = self.fit(&data, &mut train_idx, &valid_idx, &train_config, &mut rng)?;
        self.trained = true;

        if let Some(last) = trace.last() {
            info!("done training: final ELBO per cell {}", last);
        }
        Ok(trace)
    }

    fn reset_params(&mut self) -> Result<()> {
        self.varmap = VarMap::new();
        self.device = Device::Cpu;
        self.guide = Guide::new(&self.varmap, &self.device, &self.dims, &self.config)?;
        self.trained = false;
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}
