use ndarray::ArrayD;

/// Posterior summary statistics of named parameters (sites)
pub trait Inference {
    fn posterior_mean(&self, site: &str) -> Option<&ArrayD<f32>>;
    fn posterior_sd(&self, site: &str) -> Option<&ArrayD<f32>>;
    fn posterior_q05(&self, site: &str) -> Option<&ArrayD<f32>>;
    fn posterior_q95(&self, site: &str) -> Option<&ArrayD<f32>>;

    /// Names of all summarised sites
    fn site_names(&self) -> Vec<Box<str>>;
}
