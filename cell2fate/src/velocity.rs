//! RNA velocity `ds/dt = β u - γ s` from the posterior of the rates and
//! of `mu_RNAvelocity`.

use crate::error::{Cell2fateError, Result};
use crate::sites::*;

use matrix_param::summary::SiteMap;
use ndarray::prelude::*;

/// Posterior mean and standard deviation of one quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanSd {
    pub mean: f32,
    pub sd: f32,
}

impl MeanSd {
    pub fn new(mean: f32, sd: f32) -> Self {
        Self { mean, sd }
    }

    fn squared_mean(&self) -> f32 {
        self.mean * self.mean
    }

    fn second_moment(&self) -> f32 {
        self.squared_mean() + self.sd * self.sd
    }
}

/// Standard deviation of `β u - γ s` as it has always been reported
///
/// ```text
/// sqrt( (β² + σβ²)(u² + σu²) - β²u² + (γ² + σγ²)(s² + σs²) - γ²s² )
/// ```
///
/// Each product term is `Var(XY)` for independent `X` and `Y`, and the
/// two are added. The covariance between `u` and `s` is ignored.
pub fn velocity_sd(beta: MeanSd, gamma: MeanSd, u: MeanSd, s: MeanSd) -> f32 {
    let var_bu = beta.second_moment() * u.second_moment() - beta.squared_mean() * u.squared_mean();
    let var_gs = gamma.second_moment() * s.second_moment() - gamma.squared_mean() * s.squared_mean();
    (var_bu + var_gs).sqrt()
}

/// Velocity and its standard deviation, both `cells x genes`
///
/// * `means` - posterior means with `beta_g`, `gamma_g` and `mu_RNAvelocity`
/// * `stds` - posterior standard deviations of the same sites
pub fn compute_velocity(means: &SiteMap, stds: &SiteMap) -> Result<(Array2<f32>, Array2<f32>)> {
    let beta = require_dim::<Ix1>(means, BETA_G)?;
    let gamma = require_dim::<Ix1>(means, GAMMA_G)?;
    let mu = require_dim::<Ix3>(means, MU_RNAVELOCITY)?;

    let beta_sd = require_dim::<Ix1>(stds, BETA_G)?;
    let gamma_sd = require_dim::<Ix1>(stds, GAMMA_G)?;
    let mu_sd = require_dim::<Ix3>(stds, MU_RNAVELOCITY)?;

    let (ncells, ngenes, ncomp) = mu.dim();
    check_genes(BETA_G, beta.len(), ngenes)?;
    check_genes(GAMMA_G, gamma.len(), ngenes)?;
    if ncomp != NUM_MODALITIES || mu_sd.dim() != mu.dim() || beta_sd.dim() != beta.dim() || gamma_sd.dim() != gamma.dim() {
        return Err(Cell2fateError::ShapeMismatch {
            site: MU_RNAVELOCITY.into(),
            expected: vec![ncells, ngenes, NUM_MODALITIES],
            found: mu_sd.shape().to_vec(),
        });
    }

    let velocity = Array2::from_shape_fn((ncells, ngenes), |(c, g)| {
        beta[g] * mu[(c, g, UNSPLICED)] - gamma[g] * mu[(c, g, SPLICED)]
    });

    let velocity_sd = Array2::from_shape_fn((ncells, ngenes), |(c, g)| {
        velocity_sd(
            MeanSd::new(beta[g], beta_sd[g]),
            MeanSd::new(gamma[g], gamma_sd[g]),
            MeanSd::new(mu[(c, g, UNSPLICED)], mu_sd[(c, g, UNSPLICED)]),
            MeanSd::new(mu[(c, g, SPLICED)], mu_sd[(c, g, SPLICED)]),
        )
    });

    Ok((velocity, velocity_sd))
}

fn check_genes(site: &str, found: usize, ngenes: usize) -> Result<()> {
    if found != ngenes {
        return Err(Cell2fateError::ShapeMismatch {
            site: site.into(),
            expected: vec![ngenes],
            found: vec![found],
        });
    }
    Ok(())
}

/// Velocity of every posterior draw, `draws x cells x genes`
///
/// * `draws` - raw posterior draws with `beta_g`, `gamma_g` and
///   `mu_RNAvelocity` along a leading draw axis
pub fn velocity_posterior(draws: &SiteMap) -> Result<Array3<f32>> {
    let beta = require_dim::<Ix2>(draws, BETA_G)?;
    let gamma = require_dim::<Ix2>(draws, GAMMA_G)?;
    let mu = require_dim::<Ix4>(draws, MU_RNAVELOCITY)?;

    let (ndraws, ncells, ngenes, ncomp) = mu.dim();
    if ncomp != NUM_MODALITIES {
        return Err(Cell2fateError::ShapeMismatch {
            site: MU_RNAVELOCITY.into(),
            expected: vec![ndraws, ncells, ngenes, NUM_MODALITIES],
            found: mu.shape().to_vec(),
        });
    }
    if beta.dim() != (ndraws, ngenes) || gamma.dim() != (ndraws, ngenes) {
        return Err(Cell2fateError::ShapeMismatch {
            site: BETA_G.into(),
            expected: vec![ndraws, ngenes],
            found: beta.shape().to_vec(),
        });
    }

    Ok(Array3::from_shape_fn((ndraws, ncells, ngenes), |(d, c, g)| {
        beta[(d, g)] * mu[(d, c, g, UNSPLICED)] - gamma[(d, g)] * mu[(d, c, g, SPLICED)]
    }))
}
