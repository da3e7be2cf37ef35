//! Two-state transcription kinetics.
//!
//! A gene is transcribed at rate α between its switch-on time `T_on`
//! and switch-off time `T_off` and not at all otherwise. Unspliced RNA
//! `u` is spliced at rate β and spliced RNA `s` degrades at rate γ,
//! both starting from zero:
//!
//! ```text
//! du/dt = α(t) - β u
//! ds/dt = β u - γ s
//! ```
//!
//! With `τ1 = clamp(t - T_on, 0, T_off - T_on)` and
//! `τ2 = max(t - T_off, 0)` the closed-form solution is
//!
//! ```text
//! u1 = α/β (1 - exp(-β τ1))
//! s1 = α/γ (1 - exp(-γ τ1)) + α/(γ - β) (exp(-γ τ1) - exp(-β τ1))
//! u  = u1 exp(-β τ2)
//! s  = s1 exp(-γ τ2) - β u1/(γ - β) (exp(-γ τ2) - exp(-β τ2))
//! ```
//!
//! The same map exists on host arrays and on candle tensors.

use candle_core::{Result as CandleResult, Tensor};
use ndarray::prelude::*;
use rayon::prelude::*;

use crate::sites::{NUM_MODALITIES, SPLICED, UNSPLICED};

/// Smallest `|γ - β|` used in the denominators
pub const MIN_RATE_GAP: f32 = 1e-4;

fn safe_gap(gap: f32) -> f32 {
    if gap.abs() >= MIN_RATE_GAP {
        gap
    } else if gap < 0.0 {
        -MIN_RATE_GAP
    } else {
        MIN_RATE_GAP
    }
}

/// Unspliced and spliced abundance of one gene at time `t`
pub fn two_state_point(alpha: f32, beta: f32, gamma: f32, t_on: f32, t_off: f32, t: f32) -> (f32, f32) {
    let tau1 = (t - t_on).clamp(0.0, (t_off - t_on).max(0.0));
    let tau2 = (t - t_off).max(0.0);
    let gap = safe_gap(gamma - beta);

    let (eb1, eg1) = ((-beta * tau1).exp(), (-gamma * tau1).exp());
    let (eb2, eg2) = ((-beta * tau2).exp(), (-gamma * tau2).exp());

    let u1 = alpha / beta * (1.0 - eb1);
    let s1 = alpha / gamma * (1.0 - eg1) + alpha / gap * (eg1 - eb1);

    let u = u1 * eb2;
    let s = s1 * eg2 - beta * u1 / gap * (eg2 - eb2);
    (u, s)
}

/// Per-gene kinetic parameters
#[derive(Debug, Clone, Copy)]
pub struct GeneRates<'a> {
    pub alpha: ArrayView1<'a, f32>,
    pub beta: ArrayView1<'a, f32>,
    pub gamma: ArrayView1<'a, f32>,
    pub t_on: ArrayView1<'a, f32>,
    pub t_off: ArrayView1<'a, f32>,
}

impl GeneRates<'_> {
    pub fn num_genes(&self) -> usize {
        self.alpha.len()
    }
}

/// `cells x genes x 2` abundances, unspliced then spliced
///
/// * `rates` - per-gene parameters
/// * `t_c` - latent time of each cell
pub fn mu_rna_velocity(rates: &GeneRates, t_c: ArrayView1<f32>) -> Array3<f32> {
    let ngenes = rates.num_genes();
    let mut mu = Array3::<f32>::zeros((t_c.len(), ngenes, NUM_MODALITIES));

    mu.outer_iter_mut()
        .into_par_iter()
        .zip(t_c.to_vec())
        .for_each(|(mut mu_c, t)| {
            for g in 0..ngenes {
                let (u, s) = two_state_point(
                    rates.alpha[g],
                    rates.beta[g],
                    rates.gamma[g],
                    rates.t_on[g],
                    rates.t_off[g],
                    t,
                );
                mu_c[(g, UNSPLICED)] = u;
                mu_c[(g, SPLICED)] = s;
            }
        });

    mu
}

/// Differentiable version of [`mu_rna_velocity`]
///
/// * `alpha_g`, `beta_g`, `gamma_g`, `t_on_g`, `t_off_g` - `G` or `1 x G`
/// * `t_c` - `C` or `C x 1`
///
/// Returns a `C x G x 2` tensor.
pub fn mu_rna_velocity_tensor(
    alpha_g: &Tensor,
    beta_g: &Tensor,
    gamma_g: &Tensor,
    t_on_g: &Tensor,
    t_off_g: &Tensor,
    t_c: &Tensor,
) -> CandleResult<Tensor> {
    let ngenes = alpha_g.elem_count();
    let row = |x: &Tensor| x.reshape((1, ngenes));

    let (alpha, beta, gamma) = (row(alpha_g)?, row(beta_g)?, row(gamma_g)?);
    let (t_on, t_off) = (row(t_on_g)?, row(t_off_g)?);
    let t_c = t_c.reshape((t_c.elem_count(), 1))?;

    let tau1 = t_c
        .broadcast_sub(&t_on)?
        .maximum(0.0)?
        .broadcast_minimum(&(&t_off - &t_on)?.maximum(0.0)?)?;
    let tau2 = t_c.broadcast_sub(&t_off)?.maximum(0.0)?;

    // |γ - β| >= MIN_RATE_GAP, keeping the sign
    let gap = (&gamma - &beta)?;
    let nonneg = gap.ge(&gap.zeros_like()?)?;
    let gap = nonneg.where_cond(
        &gap.maximum(MIN_RATE_GAP as f64)?,
        &gap.minimum(-MIN_RATE_GAP as f64)?,
    )?;

    let decay = |tau: &Tensor, rate: &Tensor| -> CandleResult<Tensor> {
        tau.broadcast_mul(rate)?.neg()?.exp()
    };
    let (eb1, eg1) = (decay(&tau1, &beta)?, decay(&tau1, &gamma)?);
    let (eb2, eg2) = (decay(&tau2, &beta)?, decay(&tau2, &gamma)?);

    let u1 = eb1.affine(-1.0, 1.0)?.broadcast_mul(&(&alpha / &beta)?)?;
    let s1 = (eg1.affine(-1.0, 1.0)?.broadcast_mul(&(&alpha / &gamma)?)?
        + (&eg1 - &eb1)?.broadcast_mul(&(&alpha / &gap)?)?)?;

    let u = (&u1 * &eb2)?;
    let s = ((&s1 * &eg2)? - (&eg2 - &eb2)?.broadcast_mul(&(&beta / &gap)?)?.mul(&u1)?)?;

    Tensor::stack(&[u, s], 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    #[test]
    fn before_switch_on_nothing_is_made() {
        let (u, s) = two_state_point(2.0, 1.0, 0.5, 3.0, 8.0, 1.0);
        assert_eq!((u, s), (0.0, 0.0));
    }

    #[test]
    fn long_induction_reaches_steady_state() {
        // u -> α/β and s -> α/γ
        let (u, s) = two_state_point(2.0, 1.0, 0.5, 0.0, 200.0, 100.0);
        assert_abs_diff_eq!(u, 2.0, epsilon = 1e-4);
        assert_abs_diff_eq!(s, 4.0, epsilon = 1e-3);
    }

    #[test]
    fn solution_satisfies_the_ode() {
        // central differences of the closed form during induction and repression
        let (alpha, beta, gamma, t_on, t_off) = (3.0, 0.8, 0.3, 1.0, 6.0);
        for t in [3.0_f32, 9.0] {
            let h = 1e-2;
            let (u, s) = two_state_point(alpha, beta, gamma, t_on, t_off, t);
            let (u_p, s_p) = two_state_point(alpha, beta, gamma, t_on, t_off, t + h);
            let (u_m, s_m) = two_state_point(alpha, beta, gamma, t_on, t_off, t - h);
            let a = if t < t_off { alpha } else { 0.0 };
            assert_abs_diff_eq!((u_p - u_m) / (2.0 * h), a - beta * u, epsilon = 1e-2);
            assert_abs_diff_eq!((s_p - s_m) / (2.0 * h), beta * u - gamma * s, epsilon = 1e-2);
        }
    }

    #[test]
    fn equal_rates_stay_finite() {
        let (u, s) = two_state_point(1.0, 0.7, 0.7, 0.0, 5.0, 3.0);
        assert!(u.is_finite() && s.is_finite());
        assert!(s > 0.0);
    }

    #[test]
    fn host_and_tensor_versions_agree() -> anyhow::Result<()> {
        let alpha = array![1.0_f32, 2.5, 0.4];
        let beta = array![0.9_f32, 0.3, 1.2];
        let gamma = array![0.2_f32, 0.3, 2.0];
        let t_on = array![0.5_f32, 2.0, 0.0];
        let t_off = array![4.0_f32, 9.0, 1.5];
        let t_c = array![0.0_f32, 1.0, 3.0, 7.5];

        let rates = GeneRates {
            alpha: alpha.view(),
            beta: beta.view(),
            gamma: gamma.view(),
            t_on: t_on.view(),
            t_off: t_off.view(),
        };
        let host = mu_rna_velocity(&rates, t_c.view());
        assert_eq!(host.dim(), (4, 3, 2));

        let dev = Device::Cpu;
        let tt = |x: &Array1<f32>| Tensor::from_vec(x.to_vec(), (x.len(),), &dev);
        let mu = mu_rna_velocity_tensor(
            &tt(&alpha)?,
            &tt(&beta)?,
            &tt(&gamma)?,
            &tt(&t_on)?,
            &tt(&t_off)?,
            &tt(&t_c)?,
        )?;
        assert_eq!(mu.dims(), &[4, 3, 2]);

        let mu: Vec<Vec<Vec<f32>>> = mu.to_vec3()?;
        for ((c, g, m), x) in host.indexed_iter() {
            assert_abs_diff_eq!(mu[c][g][m], *x, epsilon = 1e-4);
        }
        Ok(())
    }
}
