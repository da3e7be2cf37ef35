use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::candle_loss_functions::gaussian_kl_div;

/// Maximum value for ln(σ) to keep the reparameterised draws finite
const MAX_LN_STD: f64 = 3.0;
const MIN_LN_STD: f64 = -10.0;

/// Fixed Gaussian prior N(μ₀, σ₀²) on an unconstrained variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalPrior {
    pub mean: f64,
    pub std: f64,
}

impl NormalPrior {
    pub fn new(mean: f64, std: f64) -> Self {
        Self { mean, std }
    }
}

/// Mean-field Gaussian variational distribution q(z) = N(μ, σ²I)
///
/// Parameters are stored as mean μ and log standard deviation ln(σ).
/// The first axis may index observations, in which case
/// [`GaussianVar::select_rows`] takes a minibatch of them.
pub struct GaussianVar {
    mean: Tensor,
    ln_std: Tensor,
}

impl GaussianVar {
    /// Create a new Gaussian variational distribution.
    ///
    /// # Arguments
    /// * `vb` - VarBuilder for creating trainable parameters
    /// * `dims` - shape of the variable
    /// * `init_mean` - initial mean
    /// * `init_jitter` - standard deviation of random noise added to the initial mean
    /// * `init_std` - initial standard deviation σ
    pub fn new(
        vb: VarBuilder,
        dims: &[usize],
        init_mean: f64,
        init_jitter: f64,
        init_std: f64,
    ) -> Result<Self> {
        let mean_init = if init_jitter > 0.0 {
            candle_nn::Init::Randn {
                mean: init_mean,
                stdev: init_jitter,
            }
        } else {
            candle_nn::Init::Const(init_mean)
        };
        let mean = vb.get_with_hints(dims.to_vec(), "mean", mean_init)?;
        let ln_std =
            vb.get_with_hints(dims.to_vec(), "ln_std", candle_nn::Init::Const(init_std.ln()))?;
        Ok(Self { mean, ln_std })
    }

    /// Variational mean μ.
    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    /// Clamped log standard deviation ln(σ).
    pub fn ln_std(&self) -> Result<Tensor> {
        self.ln_std.clamp(MIN_LN_STD, MAX_LN_STD)
    }

    /// Standard deviation σ = exp(ln_std).
    pub fn std(&self) -> Result<Tensor> {
        self.ln_std()?.exp()
    }

    /// Reparameterised draw z = μ + σ ε
    ///
    /// * `eps` - standard normal noise of the same shape
    pub fn rsample_with(&self, eps: &Tensor) -> Result<Tensor> {
        &self.mean + (self.std()? * eps)?
    }

    /// A view of the rows listed in `rows` (a u32 tensor)
    pub fn select_rows(&self, rows: &Tensor) -> Result<Self> {
        Ok(Self {
            mean: self.mean.index_select(rows, 0)?,
            ln_std: self.ln_std.index_select(rows, 0)?,
        })
    }

    /// KL[q || prior] summed over all elements
    pub fn kl_div(&self, prior: &NormalPrior) -> Result<Tensor> {
        gaussian_kl_div(&self.mean, &self.ln_std()?, prior.mean, prior.std)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_shapes_and_rows() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);

        let gauss = GaussianVar::new(vb.pp("z"), &[5, 3], 0.0, 0.01, 0.1)?;
        assert_eq!(gauss.mean().dims(), &[5, 3]);
        let eps = gauss.mean().randn_like(0.0, 1.0)?;
        assert_eq!(gauss.rsample_with(&eps)?.dims(), &[5, 3]);

        let rows = Tensor::from_vec(vec![4u32, 0], (2,), &Device::Cpu)?;
        let sub = gauss.select_rows(&rows)?;
        assert_eq!(sub.mean().dims(), &[2, 3]);

        let std: Vec<Vec<f32>> = sub.std()?.to_vec2()?;
        assert!((std[1][2] - 0.1).abs() < 1e-6);

        // two trainable tensors per variable
        assert_eq!(varmap.all_vars().len(), 2);
        Ok(())
    }

    #[test]
    fn test_kl_matches_closed_form() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);

        let gauss = GaussianVar::new(vb, &[2], 1.0, 0.0, 1.0)?;
        let kl: f32 = gauss.kl_div(&NormalPrior::new(0.0, 1.0))?.to_scalar()?;
        // each element: (1 + 1)/2 - 1/2 = 0.5
        assert!((kl - 1.0).abs() < 1e-5);
        Ok(())
    }
}
