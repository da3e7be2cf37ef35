use crate::error::{Cell2fateError, Result};
use crate::registry::SummaryStats;

use matrix_param::summary::SiteMap;
use ndarray::prelude::*;

pub const ALPHA_G: &str = "alpha_g";
pub const BETA_G: &str = "beta_g";
pub const GAMMA_G: &str = "gamma_g";
pub const T_GON: &str = "T_gON";
pub const T_GOFF: &str = "T_gOFF";
pub const S_G_GENE_ADD: &str = "s_g_gene_add";
pub const DISPERSION_G: &str = "dispersion_g";
pub const T_C: &str = "T_c";
pub const DETECTION_Y_CU: &str = "detection_y_cu";
pub const DETECTION_Y_CS: &str = "detection_y_cs";
pub const MU_RNAVELOCITY: &str = "mu_RNAvelocity";

/// Sites drawn once per posterior draw
pub const GLOBAL_SITES: [&str; 7] = [
    ALPHA_G,
    BETA_G,
    GAMMA_G,
    T_GON,
    T_GOFF,
    S_G_GENE_ADD,
    DISPERSION_G,
];

/// Sites with one entry per cell
pub const LOCAL_SITES: [&str; 4] = [T_C, DETECTION_Y_CU, DETECTION_Y_CS, MU_RNAVELOCITY];

/// Unspliced and spliced components of modality-indexed sites
pub const UNSPLICED: usize = 0;
pub const SPLICED: usize = 1;
pub const NUM_MODALITIES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDims {
    pub n_cells: usize,
    pub n_genes: usize,
    pub n_batch: usize,
}

impl From<SummaryStats> for ModelDims {
    fn from(stats: SummaryStats) -> Self {
        Self {
            n_cells: stats.n_cells,
            n_genes: stats.n_vars,
            n_batch: stats.n_batch,
        }
    }
}

impl ModelDims {
    /// Declared shape of a site, `None` for unknown sites
    pub fn site_shape(&self, site: &str) -> Option<Vec<usize>> {
        let (c, g, b) = (self.n_cells, self.n_genes, self.n_batch);
        match site {
            ALPHA_G | BETA_G | GAMMA_G | T_GON | T_GOFF => Some(vec![g]),
            S_G_GENE_ADD => Some(vec![b, g, NUM_MODALITIES]),
            DISPERSION_G => Some(vec![g, NUM_MODALITIES]),
            T_C | DETECTION_Y_CU | DETECTION_Y_CS => Some(vec![c]),
            MU_RNAVELOCITY => Some(vec![c, g, NUM_MODALITIES]),
            _ => None,
        }
    }

    /// Every known site present in `sites` must have its declared shape
    pub fn validate(&self, sites: &SiteMap) -> Result<()> {
        for (site, x) in sites.iter() {
            if let Some(expected) = self.site_shape(site) {
                if x.shape() != expected.as_slice() {
                    return Err(Cell2fateError::ShapeMismatch {
                        site: site.to_string(),
                        expected,
                        found: x.shape().to_vec(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Same as [`ModelDims::validate`] for draws stacked along a
    /// leading axis
    pub fn validate_draws(&self, draws: &SiteMap) -> Result<()> {
        for (site, x) in draws.iter() {
            if let Some(shape) = self.site_shape(site) {
                let found = x.shape();
                if found.len() != shape.len() + 1 || found[1..] != shape[..] {
                    let mut expected = vec![found.first().copied().unwrap_or(0)];
                    expected.extend(shape);
                    return Err(Cell2fateError::ShapeMismatch {
                        site: site.to_string(),
                        expected,
                        found: found.to_vec(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Look up a site that must be present
pub fn require<'a>(sites: &'a SiteMap, site: &str) -> Result<&'a ArrayD<f32>> {
    sites
        .get(site)
        .ok_or_else(|| Cell2fateError::MissingSite(site.to_string()))
}

/// Look up a site with a fixed number of axes
pub fn require_dim<'a, D: Dimension>(sites: &'a SiteMap, site: &str) -> Result<ArrayView<'a, f32, D>> {
    let x = require(sites, site)?;
    x.view()
        .into_dimensionality::<D>()
        .map_err(|_| Cell2fateError::ShapeMismatch {
            site: site.to_string(),
            expected: vec![0; D::NDIM.unwrap_or(0)],
            found: x.shape().to_vec(),
        })
}
