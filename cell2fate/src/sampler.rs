use crate::config::SampleKwargs;
use crate::diagnostics::SummaryStat;
use crate::engine::{seeded_rng, Cell2fateEngine, Guide};
use crate::error::{Cell2fateError, Result};
use crate::kinetics::{mu_rna_velocity, GeneRates};
use crate::registry::DataRegistry;
use crate::sites::*;
use crate::traits::Sampler;

use candle_core::{Device, Tensor};
use candle_util::candle_variational::GaussianVar;
use indicatif::ProgressBar;
use log::info;
use matrix_param::summary::{PosteriorSummary, SiteMap};
use matrix_util::utils::generate_minibatch_intervals;
use ndarray::prelude::*;
use ndarray::{stack, Slice, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// Posterior summary statistics of every site and, optionally, the raw
/// draws they were computed from
#[derive(Debug, Clone, Default)]
pub struct PosteriorSampleSet {
    pub summary: PosteriorSummary,
    /// site -> `num_samples x (site shape)`
    pub posterior_samples: Option<SiteMap>,
}

impl PosteriorSampleSet {
    pub fn post_sample_means(&self) -> &SiteMap {
        &self.summary.means
    }

    pub fn post_sample_stds(&self) -> &SiteMap {
        &self.summary.stds
    }

    pub fn post_sample_q05(&self) -> &SiteMap {
        &self.summary.q05
    }

    pub fn post_sample_q95(&self) -> &SiteMap {
        &self.summary.q95
    }

    pub fn stat(&self, stat: SummaryStat) -> &SiteMap {
        match stat {
            SummaryStat::Means => self.post_sample_means(),
            SummaryStat::Stds => self.post_sample_stds(),
            SummaryStat::Q05 => self.post_sample_q05(),
            SummaryStat::Q95 => self.post_sample_q95(),
        }
    }
}

fn to_host(x: &Tensor) -> Result<ArrayD<f32>> {
    let dims = x.dims().to_vec();
    let data: Vec<f32> = x.to_device(&Device::Cpu)?.flatten_all()?.to_vec1()?;
    Ok(ArrayD::from_shape_vec(IxDyn(&dims), data)?)
}

/// Host copy of one Gaussian variational variable
struct HostVar {
    mean: ArrayD<f32>,
    std: ArrayD<f32>,
}

impl HostVar {
    fn new(var: &GaussianVar) -> Result<Self> {
        Ok(Self {
            mean: to_host(var.mean())?,
            std: to_host(&var.std()?)?,
        })
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> ArrayD<f32> {
        Zip::from(&self.mean)
            .and(&self.std)
            .map_collect(|&m, &s| m + s * rng.sample::<f32, _>(StandardNormal))
    }

    /// Draw the rows `lb..ub` of a cell-level variable
    fn draw_rows<R: Rng>(&self, lb: usize, ub: usize, rng: &mut R) -> ArrayD<f32> {
        let rows = Slice::from(lb..ub);
        Zip::from(self.mean.slice_axis(Axis(0), rows))
            .and(self.std.slice_axis(Axis(0), rows))
            .map_collect(|&m, &s| m + s * rng.sample::<f32, _>(StandardNormal))
    }
}

struct HostGuide {
    log_alpha: HostVar,
    log_beta: HostVar,
    log_gamma: HostVar,
    logit_switch_on: HostVar,
    log_duration: HostVar,
    log_gene_add: HostVar,
    log_dispersion: HostVar,
    logit_latent_time: HostVar,
    log_detection_u: HostVar,
    log_detection_s: HostVar,
}

impl HostGuide {
    fn new(guide: &Guide) -> Result<Self> {
        Ok(Self {
            log_alpha: HostVar::new(&guide.log_alpha)?,
            log_beta: HostVar::new(&guide.log_beta)?,
            log_gamma: HostVar::new(&guide.log_gamma)?,
            logit_switch_on: HostVar::new(&guide.logit_switch_on)?,
            log_duration: HostVar::new(&guide.log_duration)?,
            log_gene_add: HostVar::new(&guide.log_gene_add)?,
            log_dispersion: HostVar::new(&guide.log_dispersion)?,
            logit_latent_time: HostVar::new(&guide.logit_latent_time)?,
            log_detection_u: HostVar::new(&guide.log_detection_u)?,
            log_detection_s: HostVar::new(&guide.log_detection_s)?,
        })
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// One draw of the gene-level sites
struct GlobalDraw {
    alpha: Array1<f32>,
    beta: Array1<f32>,
    gamma: Array1<f32>,
    t_on: Array1<f32>,
    t_off: Array1<f32>,
    gene_add: ArrayD<f32>,
    dispersion: ArrayD<f32>,
}

impl GlobalDraw {
    fn new<R: Rng>(guide: &HostGuide, t_max: f32, rng: &mut R) -> Result<Self> {
        let vec1 = |x: ArrayD<f32>| x.into_dimensionality::<Ix1>();

        let alpha = vec1(guide.log_alpha.draw(rng).mapv(f32::exp))?;
        let beta = vec1(guide.log_beta.draw(rng).mapv(f32::exp))?;
        let gamma = vec1(guide.log_gamma.draw(rng).mapv(f32::exp))?;
        let t_on = vec1(guide.logit_switch_on.draw(rng).mapv(|z| t_max * sigmoid(z)))?;
        let duration = vec1(guide.log_duration.draw(rng).mapv(f32::exp))?;
        let t_off = &t_on + &duration;
        let gene_add = guide.log_gene_add.draw(rng).mapv(f32::exp);
        let dispersion = guide.log_dispersion.draw(rng).mapv(f32::exp);

        Ok(Self {
            alpha,
            beta,
            gamma,
            t_on,
            t_off,
            gene_add,
            dispersion,
        })
    }

    fn site(&self, site: &str) -> Option<ArrayViewD<f32>> {
        match site {
            ALPHA_G => Some(self.alpha.view().into_dyn()),
            BETA_G => Some(self.beta.view().into_dyn()),
            GAMMA_G => Some(self.gamma.view().into_dyn()),
            T_GON => Some(self.t_on.view().into_dyn()),
            T_GOFF => Some(self.t_off.view().into_dyn()),
            S_G_GENE_ADD => Some(self.gene_add.view()),
            DISPERSION_G => Some(self.dispersion.view()),
            _ => None,
        }
    }

    fn rates(&self) -> GeneRates {
        GeneRates {
            alpha: self.alpha.view(),
            beta: self.beta.view(),
            gamma: self.gamma.view(),
            t_on: self.t_on.view(),
            t_off: self.t_off.view(),
        }
    }
}

/// One draw of the cell-level sites over a block of cells
struct LocalDraw {
    t_c: ArrayD<f32>,
    detection_u: ArrayD<f32>,
    detection_s: ArrayD<f32>,
    mu: ArrayD<f32>,
}

impl LocalDraw {
    fn new<R: Rng>(
        guide: &HostGuide,
        global: &GlobalDraw,
        (lb, ub): (usize, usize),
        t_max: f32,
        rng: &mut R,
    ) -> Result<Self> {
        let t_c = guide
            .logit_latent_time
            .draw_rows(lb, ub, rng)
            .mapv(|z| t_max * sigmoid(z));
        let detection_u = guide.log_detection_u.draw_rows(lb, ub, rng).mapv(f32::exp);
        let detection_s = guide.log_detection_s.draw_rows(lb, ub, rng).mapv(f32::exp);

        let mu = mu_rna_velocity(&global.rates(), t_c.view().into_dimensionality::<Ix1>()?);

        Ok(Self {
            t_c,
            detection_u,
            detection_s,
            mu: mu.into_dyn(),
        })
    }

    fn site(&self, site: &str) -> Option<ArrayViewD<f32>> {
        match site {
            T_C => Some(self.t_c.view()),
            DETECTION_Y_CU => Some(self.detection_u.view()),
            DETECTION_Y_CS => Some(self.detection_s.view()),
            MU_RNAVELOCITY => Some(self.mu.view()),
            _ => None,
        }
    }
}

/// Stack per-draw arrays of each site along a new leading axis
fn stack_sites<'a, T, F>(draws: &'a [T], sites: &[&str], get: F) -> Result<SiteMap>
where
    F: Fn(&'a T, &str) -> Option<ArrayViewD<'a, f32>>,
{
    let mut ret = SiteMap::new();
    for &site in sites {
        let views = draws
            .iter()
            .map(|d| get(d, site).ok_or_else(|| Cell2fateError::MissingSite(site.into())))
            .collect::<Result<Vec<_>>>()?;
        ret.insert(site.into(), stack(Axis(0), &views)?);
    }
    Ok(ret)
}

/// Concatenate raw draws of consecutive cell blocks along the cell axis
fn concatenate_draw_blocks(blocks: &[SiteMap]) -> Result<SiteMap> {
    let mut ret = SiteMap::new();
    for &site in LOCAL_SITES.iter() {
        let views = blocks
            .iter()
            .map(|b| {
                b.get(site)
                    .map(|x| x.view())
                    .ok_or_else(|| Cell2fateError::MissingSite(site.into()))
            })
            .collect::<Result<Vec<_>>>()?;
        if !views.is_empty() {
            ret.insert(site.into(), ndarray::concatenate(Axis(1), &views)?);
        }
    }
    Ok(ret)
}

impl Sampler for Cell2fateEngine {
    /// Draw `num_samples` times from the guide and summarise every site
    ///
    /// Gene-level sites are drawn once per draw; cell-level sites and
    /// `mu_RNAvelocity` are drawn block by block over `batch_size` cells
    /// so that only one block of `num_samples x cells x genes x 2` draws
    /// is held at a time (unless raw draws are requested).
    fn sample_posterior(
        &self,
        registry: &DataRegistry,
        kwargs: &SampleKwargs,
    ) -> Result<PosteriorSampleSet> {
        if !self.trained {
            return Err(Cell2fateError::Precondition(
                "the model must be trained before sampling the posterior".into(),
            ));
        }
        self.check_dims(registry)?;

        let num_samples = kwargs.num_samples;
        if num_samples == 0 {
            return Err(Cell2fateError::InvalidArgument(
                "num_samples must be positive".into(),
            ));
        }
        if kwargs.use_gpu {
            info!("posterior draws are generated on the host");
        }

        let t_max = self.config.t_max;
        let guide = HostGuide::new(&self.guide)?;
        let mut rng = seeded_rng(kwargs.seed);

        let seeds: Vec<u64> = (0..num_samples).map(|_| rng.random()).collect();
        let globals = seeds
            .par_iter()
            .map(|&seed| GlobalDraw::new(&guide, t_max, &mut StdRng::seed_from_u64(seed)))
            .collect::<Result<Vec<_>>>()?;

        let global_draws = stack_sites(&globals, &GLOBAL_SITES, GlobalDraw::site)?;
        let mut summary = PosteriorSummary::from_draws(&global_draws)?;

        let blocks = generate_minibatch_intervals(self.dims.n_cells, kwargs.batch_size);
        info!(
            "drawing {} posterior samples over {} block(s) of cells",
            num_samples,
            blocks.len()
        );

        let pb = ProgressBar::new(blocks.len() as u64);
        let mut block_summaries = Vec::with_capacity(blocks.len());
        let mut block_draws = vec![];

        for &block in blocks.iter() {
            let seeds: Vec<u64> = (0..num_samples).map(|_| rng.random()).collect();
            let locals = globals
                .par_iter()
                .zip(seeds.par_iter())
                .map(|(global, &seed)| {
                    LocalDraw::new(&guide, global, block, t_max, &mut StdRng::seed_from_u64(seed))
                })
                .collect::<Result<Vec<_>>>()?;

            let local_draws = stack_sites(&locals, &LOCAL_SITES, LocalDraw::site)?;
            block_summaries.push(PosteriorSummary::from_draws(&local_draws)?);
            if kwargs.return_samples {
                block_draws.push(local_draws);
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        summary.extend(PosteriorSummary::concatenate_blocks(&block_summaries)?);

        let posterior_samples = if kwargs.return_samples {
            let mut draws = global_draws;
            draws.extend(concatenate_draw_blocks(&block_draws)?);
            Some(draws)
        } else {
            None
        };

        Ok(PosteriorSampleSet {
            summary,
            posterior_samples,
        })
    }

    fn model_name(&self) -> &str {
        "Cell2fateEngine"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn host_draws_follow_mean_and_std() {
        let var = HostVar {
            mean: ArrayD::from_elem(IxDyn(&[4000]), 2.0),
            std: ArrayD::from_elem(IxDyn(&[4000]), 0.5),
        };
        let mut rng = StdRng::seed_from_u64(1);
        let x = var.draw(&mut rng);
        let mean = x.mean().unwrap_or(f32::NAN);
        let sd = x.std(0.0);
        assert_abs_diff_eq!(mean, 2.0, epsilon = 0.05);
        assert_abs_diff_eq!(sd, 0.5, epsilon = 0.05);

        let rows = var.draw_rows(10, 15, &mut rng);
        assert_eq!(rows.shape(), &[5]);
    }

    #[test]
    fn draw_blocks_join_along_cells() -> anyhow::Result<()> {
        let block = |ncells: usize| {
            let mut m = SiteMap::new();
            m.insert(T_C.into(), ArrayD::zeros(IxDyn(&[3, ncells])));
            m.insert(DETECTION_Y_CU.into(), ArrayD::zeros(IxDyn(&[3, ncells])));
            m.insert(DETECTION_Y_CS.into(), ArrayD::zeros(IxDyn(&[3, ncells])));
            m.insert(MU_RNAVELOCITY.into(), ArrayD::zeros(IxDyn(&[3, ncells, 2, 2])));
            m
        };
        let joined = concatenate_draw_blocks(&[block(4), block(1)])?;
        assert_eq!(joined[MU_RNAVELOCITY].shape(), &[3, 5, 2, 2]);
        assert_eq!(joined[T_C].shape(), &[3, 5]);
        Ok(())
    }
}
