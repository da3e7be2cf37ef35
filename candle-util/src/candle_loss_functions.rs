use candle_core::{Result, Tensor};

/// Fast lgamma approximation for tensors (Paul Mineiro's fastlgamma).
///
/// ```text
/// lgamma(x) ≈ -2.081061466 - x + 0.0833333/(x+3) - log(x*(1+x)*(2+x)) + (2.5+x)*log(x+3)
/// ```
pub fn lgamma_approx(x: &Tensor) -> Result<Tensor> {
    let x_safe = x.clamp(1e-6f32, f32::MAX)?;

    let x_plus_1 = (&x_safe + 1.0)?;
    let x_plus_2 = (&x_safe + 2.0)?;
    let logterm = ((&x_safe * &x_plus_1)? * &x_plus_2)?.log()?;

    let xp3 = (&x_safe + 3.0)?;
    let log_xp3 = xp3.log()?;

    let recip_term = (xp3.recip()? * 0.0833333)?;
    let mult_term = ((&x_safe + 2.5)? * &log_xp3)?;

    (((recip_term - 2.081061466)? - &x_safe)? - &logterm)? + &mult_term
}

/// KL divergence of a diagonal Gaussian from a fixed Gaussian prior,
/// summed over all elements
///
/// KL[N(μ, σ²) || N(μ₀, σ₀²)] = ln(σ₀/σ) + (σ² + (μ - μ₀)²)/(2σ₀²) - 1/2
///
/// * `mean` - variational mean μ
/// * `ln_std` - variational log standard deviation ln σ
/// * `prior_mean` - μ₀
/// * `prior_std` - σ₀
///
pub fn gaussian_kl_div(
    mean: &Tensor,
    ln_std: &Tensor,
    prior_mean: f64,
    prior_std: f64,
) -> Result<Tensor> {
    let var = (ln_std * 2.0)?.exp()?;
    let diff_sq = (mean - prior_mean)?.sqr()?;
    let scaled = ((var + diff_sq)? * (0.5 / (prior_std * prior_std)))?;
    ((scaled - ln_std)? + (prior_std.ln() - 0.5))?.sum_all()
}

/// Negative Binomial log-likelihood of count data, summed over the
/// last dimension
///
/// ```text
/// log P(y | μ, r) = lgamma(y + r) - lgamma(r) - lgamma(y + 1)
///                 + r*log(r) + y*log(μ) - (r+y)*log(r+μ)
/// ```
///
/// * `y_nd` - observed counts (n x d)
/// * `mu_nd` - expected counts (n x d), positive
/// * `r_d` - shape/dispersion r, broadcastable to (n x d)
///
pub fn negative_binomial_likelihood(y_nd: &Tensor, mu_nd: &Tensor, r_d: &Tensor) -> Result<Tensor> {
    let eps = 1e-8;
    let mu = (mu_nd + eps)?;
    let r = r_d.broadcast_as(mu.dims())?.contiguous()?;

    let y_plus_r = (y_nd + &r)?;
    let r_plus_mu = (&r + &mu)?;

    let lgamma_terms = ((lgamma_approx(&y_plus_r)? - lgamma_approx(&r)?)?
        - lgamma_approx(&(y_nd + 1.0)?)?)?;

    let r_log_r = (&r * (&r + eps)?.log()?)?;
    let y_log_mu = (y_nd * mu.log()?)?;
    let r_plus_y_log = (&y_plus_r * r_plus_mu.log()?)?;

    let log_prob = (((lgamma_terms + r_log_r)? + y_log_mu)? - r_plus_y_log)?;
    log_prob.sum(log_prob.rank() - 1)
}
