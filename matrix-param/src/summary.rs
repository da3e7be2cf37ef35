use crate::traits::Inference;
use ndarray::prelude::*;
use ndarray::{concatenate, IxDyn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

/// site name -> array
pub type SiteMap = BTreeMap<Box<str>, ArrayD<f32>>;

/// Summary of posterior draws of one site
#[derive(Debug, Clone)]
pub struct DrawSummary {
    pub mean: ArrayD<f32>,
    pub sd: ArrayD<f32>,
    pub q05: ArrayD<f32>,
    pub q95: ArrayD<f32>,
}

/// Posterior mean, standard deviation and 5%/95% quantiles of every site
#[derive(Debug, Clone, Default, Serialize)]
pub struct PosteriorSummary {
    pub means: SiteMap,
    pub stds: SiteMap,
    pub q05: SiteMap,
    pub q95: SiteMap,
}

/// Summarise posterior draws stacked along the first axis
///
/// * `draws` - `num_draws x (site shape)` array
///
/// The standard deviation is the population one (divided by the
/// number of draws); quantiles interpolate linearly between order
/// statistics.
pub fn summarize_draws(draws: ArrayViewD<f32>) -> anyhow::Result<DrawSummary> {
    if draws.ndim() == 0 {
        anyhow::bail!("draws need a leading draw axis");
    }

    let ndraw = draws.shape()[0];
    if ndraw == 0 {
        anyhow::bail!("no posterior draws to summarise");
    }

    let site_shape = draws.shape()[1..].to_vec();
    let nelem: usize = site_shape.iter().product();

    let flat = draws
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((ndraw, nelem))?;

    let mean = flat
        .mean_axis(Axis(0))
        .ok_or_else(|| anyhow::anyhow!("empty draws"))?;
    let sd = flat.std_axis(Axis(0), 0.0);

    let mut sorted = flat.reversed_axes().as_standard_layout().into_owned();
    sorted
        .outer_iter_mut()
        .into_par_iter()
        .for_each(|mut x_j| {
            if let Some(x_j) = x_j.as_slice_mut() {
                x_j.sort_unstable_by(|a, b| a.total_cmp(b));
            }
        });

    let q05 = sorted.map_axis(Axis(1), |x| sorted_quantile(x, 0.05));
    let q95 = sorted.map_axis(Axis(1), |x| sorted_quantile(x, 0.95));

    let reshape = |x: Array1<f32>| -> anyhow::Result<ArrayD<f32>> {
        Ok(x.into_shape_with_order(IxDyn(&site_shape))?)
    };

    Ok(DrawSummary {
        mean: reshape(mean)?,
        sd: reshape(sd)?,
        q05: reshape(q05)?,
        q95: reshape(q95)?,
    })
}

/// Quantile `q` of an ascending sequence by linear interpolation
pub fn sorted_quantile(sorted: ArrayView1<f32>, q: f32) -> f32 {
    let n = sorted.len();
    if n == 0 {
        return f32::NAN;
    }
    let idx = (q * (n - 1) as f32).clamp(0.0, (n - 1) as f32);
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = idx - lo as f32;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

impl PosteriorSummary {
    /// Summarise every site of `draws` (leading draw axis)
    pub fn from_draws(draws: &SiteMap) -> anyhow::Result<Self> {
        let mut ret = Self::default();
        for (site, x) in draws.iter() {
            ret.insert_draws(site, x.view())?;
        }
        Ok(ret)
    }

    /// Summarise draws of one site and keep the result
    pub fn insert_draws(&mut self, site: &str, draws: ArrayViewD<f32>) -> anyhow::Result<()> {
        let summary = summarize_draws(draws)?;
        self.insert(site, summary);
        Ok(())
    }

    pub fn insert(&mut self, site: &str, summary: DrawSummary) {
        let site: Box<str> = site.into();
        self.means.insert(site.clone(), summary.mean);
        self.stds.insert(site.clone(), summary.sd);
        self.q05.insert(site.clone(), summary.q05);
        self.q95.insert(site, summary.q95);
    }

    /// Concatenate summaries of consecutive observation blocks along
    /// the first site axis
    ///
    /// * `blocks` - summaries of the same sites over disjoint, ordered
    ///   blocks of observations
    pub fn concatenate_blocks(blocks: &[PosteriorSummary]) -> anyhow::Result<Self> {
        let first = match blocks.first() {
            Some(x) => x,
            None => return Ok(Self::default()),
        };

        fn cat(blocks: &[&SiteMap], site: &str) -> anyhow::Result<ArrayD<f32>> {
            let views = blocks
                .iter()
                .map(|m| {
                    m.get(site)
                        .map(|x| x.view())
                        .ok_or_else(|| anyhow::anyhow!("site {} missing in a block", site))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(concatenate(Axis(0), &views)?)
        }

        let mut ret = Self::default();
        for site in first.means.keys() {
            let means: Vec<&SiteMap> = blocks.iter().map(|b| &b.means).collect();
            let stds: Vec<&SiteMap> = blocks.iter().map(|b| &b.stds).collect();
            let q05: Vec<&SiteMap> = blocks.iter().map(|b| &b.q05).collect();
            let q95: Vec<&SiteMap> = blocks.iter().map(|b| &b.q95).collect();
            ret.means.insert(site.clone(), cat(&means, site)?);
            ret.stds.insert(site.clone(), cat(&stds, site)?);
            ret.q05.insert(site.clone(), cat(&q05, site)?);
            ret.q95.insert(site.clone(), cat(&q95, site)?);
        }
        Ok(ret)
    }

    /// Absorb all sites of `other`, replacing ones with the same name
    pub fn extend(&mut self, other: PosteriorSummary) {
        self.means.extend(other.means);
        self.stds.extend(other.stds);
        self.q05.extend(other.q05);
        self.q95.extend(other.q95);
    }
}

impl Inference for PosteriorSummary {
    fn posterior_mean(&self, site: &str) -> Option<&ArrayD<f32>> {
        self.means.get(site)
    }

    fn posterior_sd(&self, site: &str) -> Option<&ArrayD<f32>> {
        self.stds.get(site)
    }

    fn posterior_q05(&self, site: &str) -> Option<&ArrayD<f32>> {
        self.q05.get(site)
    }

    fn posterior_q95(&self, site: &str) -> Option<&ArrayD<f32>> {
        self.q95.get(site)
    }

    fn site_names(&self) -> Vec<Box<str>> {
        self.means.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn quantiles_interpolate_linearly() {
        let x = array![1.0_f32, 2.0, 3.0, 4.0, 5.0];
        assert_abs_diff_eq!(sorted_quantile(x.view(), 0.5), 3.0);
        assert_abs_diff_eq!(sorted_quantile(x.view(), 0.05), 1.2, epsilon = 1e-6);
        assert_abs_diff_eq!(sorted_quantile(x.view(), 0.95), 4.8, epsilon = 1e-6);
        assert_abs_diff_eq!(sorted_quantile(x.view(), 1.0), 5.0);
    }

    #[test]
    fn summarise_keeps_site_shape() -> anyhow::Result<()> {
        // 4 draws of a 2 x 3 site; element (i, j) of draw s is s + 10 i + j
        let draws = Array3::<f32>::from_shape_fn((4, 2, 3), |(s, i, j)| {
            s as f32 + 10.0 * i as f32 + j as f32
        })
        .into_dyn();

        let summary = summarize_draws(draws.view())?;
        assert_eq!(summary.mean.shape(), &[2, 3]);
        assert_abs_diff_eq!(summary.mean[[1, 2]], 13.5);
        // population sd of {0, 1, 2, 3}
        assert_abs_diff_eq!(summary.sd[[0, 0]], 1.25_f32.sqrt(), epsilon = 1e-6);
        assert_abs_diff_eq!(summary.q05[[0, 1]], 1.15, epsilon = 1e-5);
        assert_abs_diff_eq!(summary.q95[[0, 1]], 3.85, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn blocks_concatenate_along_observations() -> anyhow::Result<()> {
        let a = Array3::<f32>::zeros((3, 2, 4)).into_dyn();
        let b = Array3::<f32>::ones((3, 1, 4)).into_dyn();

        let mut sa = PosteriorSummary::default();
        sa.insert_draws("mu", a.view())?;
        let mut sb = PosteriorSummary::default();
        sb.insert_draws("mu", b.view())?;

        let cat = PosteriorSummary::concatenate_blocks(&[sa, sb])?;
        let mu = cat.posterior_mean("mu").unwrap();
        assert_eq!(mu.shape(), &[3, 4]);
        assert_eq!(mu[[2, 0]], 1.0);
        assert_eq!(cat.site_names(), vec![Box::<str>::from("mu")]);
        Ok(())
    }

    #[test]
    fn empty_draws_fail() {
        let x = ArrayD::<f32>::zeros(IxDyn(&[0, 3]));
        assert!(summarize_draws(x.view()).is_err());
    }
}
