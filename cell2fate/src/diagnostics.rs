//! Reconstruction QC: expected counts under a posterior summary against
//! the observed counts of a random subsample of cells.

use crate::error::{Cell2fateError, Result};
use crate::kinetics::{mu_rna_velocity, GeneRates};
use crate::registry::DataRegistry;
use crate::sites::*;

use log::info;
use matrix_param::summary::SiteMap;
use matrix_util::traits::RowsToDense;
use ndarray::prelude::*;
use rand::Rng;
use std::fmt;
use std::str::FromStr;

/// Which posterior summary to plug into the forward map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryStat {
    #[default]
    Means,
    Stds,
    Q05,
    Q95,
}

impl FromStr for SummaryStat {
    type Err = Cell2fateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "means" | "mean" => Ok(Self::Means),
            "stds" | "std" => Ok(Self::Stds),
            "q05" => Ok(Self::Q05),
            "q95" => Ok(Self::Q95),
            other => Err(Cell2fateError::InvalidArgument(format!(
                "unknown summary statistic {:?} (means, stds, q05, q95)",
                other
            ))),
        }
    }
}

impl fmt::Display for SummaryStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Means => "means",
            Self::Stds => "stds",
            Self::Q05 => "q05",
            Self::Q95 => "q95",
        };
        write!(f, "{}", s)
    }
}

/// Expected counts of `cells`, `cells.len() x genes x 2`
///
/// Recomputes the kinetics from the gene rates and latent time in
/// `sites`, adds the batch background and scales by detection
/// efficiency.
pub fn compute_expected(sites: &SiteMap, registry: &DataRegistry, cells: &[usize]) -> Result<Array3<f32>> {
    let dims = ModelDims::from(registry.summary_stats());
    dims.validate(sites)?;

    if let Some(&c) = cells.iter().find(|&&c| c >= dims.n_cells) {
        return Err(Cell2fateError::InvalidArgument(format!(
            "cell {} out of range ({} cells)",
            c, dims.n_cells
        )));
    }

    let rates = GeneRates {
        alpha: require_dim::<Ix1>(sites, ALPHA_G)?,
        beta: require_dim::<Ix1>(sites, BETA_G)?,
        gamma: require_dim::<Ix1>(sites, GAMMA_G)?,
        t_on: require_dim::<Ix1>(sites, T_GON)?,
        t_off: require_dim::<Ix1>(sites, T_GOFF)?,
    };

    let t_c = require_dim::<Ix1>(sites, T_C)?.select(Axis(0), cells);
    let mut mu = mu_rna_velocity(&rates, t_c.view());

    let gene_add = require_dim::<Ix3>(sites, S_G_GENE_ADD)?;
    let batch = registry.batch_codes()?;

    for (m, site) in [DETECTION_Y_CU, DETECTION_Y_CS].into_iter().enumerate() {
        let detection = require_dim::<Ix1>(sites, site)?;
        for (k, &c) in cells.iter().enumerate() {
            let background = gene_add.slice(s![batch[c], .., m]);
            let mut mu_cm = mu.slice_mut(s![k, .., m]);
            mu_cm += &background;
            mu_cm *= detection[c];
        }
    }

    Ok(mu)
}

/// Paired expected and observed counts on a subsample of cells
#[derive(Debug, Clone)]
pub struct ReconstructionQc {
    /// Positions of the subsampled cells in the registered data
    pub cell_indices: Vec<usize>,
    /// `[unspliced, spliced]`, each `cells x genes`
    pub expected: [Array2<f32>; NUM_MODALITIES],
    pub observed: [Array2<f32>; NUM_MODALITIES],
    /// Pearson correlation of `log1p(expected)` and `log1p(observed)`
    pub correlation: [f32; NUM_MODALITIES],
}

/// Compare expected counts under `sites` with the registered counts
///
/// * `sites` - one posterior summary (means, stds, q05 or q95)
/// * `use_n_obs` - number of cells to subsample without replacement;
///   clamped to the number of cells, `None` uses every cell in order
/// * `rng` - source of the subsample
pub fn reconstruct<R: Rng + ?Sized>(
    sites: &SiteMap,
    registry: &DataRegistry,
    use_n_obs: Option<usize>,
    rng: &mut R,
) -> Result<ReconstructionQc> {
    let ncells = registry.summary_stats().n_cells;

    let cell_indices: Vec<usize> = match use_n_obs {
        Some(k) => rand::seq::index::sample(rng, ncells, k.min(ncells)).into_vec(),
        None => (0..ncells).collect(),
    };

    info!("reconstruction QC on {} of {} cells", cell_indices.len(), ncells);

    let expected = compute_expected(sites, registry, &cell_indices)?;
    let observed = [
        registry.unspliced()?.rows_to_dense(&cell_indices)?,
        registry.spliced()?.rows_to_dense(&cell_indices)?,
    ];

    let expected = [
        expected.slice(s![.., .., UNSPLICED]).to_owned(),
        expected.slice(s![.., .., SPLICED]).to_owned(),
    ];

    let correlation = [
        log1p_correlation(&expected[UNSPLICED], &observed[UNSPLICED]),
        log1p_correlation(&expected[SPLICED], &observed[SPLICED]),
    ];

    Ok(ReconstructionQc {
        cell_indices,
        expected,
        observed,
        correlation,
    })
}

/// Pearson correlation of `log1p` values, NaN when either side is
/// constant
pub fn log1p_correlation(x: &Array2<f32>, y: &Array2<f32>) -> f32 {
    let x = x.mapv(f32::ln_1p);
    let y = y.mapv(f32::ln_1p);
    pearson(x.iter().copied(), y.iter().copied())
}

fn pearson<I: Iterator<Item = f32>>(x: I, y: I) -> f32 {
    let (mut n, mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0_f64, 0., 0., 0., 0., 0.);
    for (a, b) in x.zip(y) {
        let (a, b) = (a as f64, b as f64);
        n += 1.;
        sx += a;
        sy += b;
        sxx += a * a;
        syy += b * b;
        sxy += a * b;
    }
    let cov = sxy - sx * sy / n;
    let vx = sxx - sx * sx / n;
    let vy = syy - sy * sy / n;
    (cov / (vx * vy).sqrt()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anndata::{AnnData, Layer};
    use crate::config::SetupArgs;
    use crate::registry::setup_anndata;
    use approx::assert_abs_diff_eq;
    use nalgebra_sparse::{coo::CooMatrix, csr::CsrMatrix};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn summary(ncells: usize, ngenes: usize) -> SiteMap {
        let mut ret = SiteMap::new();
        let gene = |x: f32| ArrayD::from_elem(IxDyn(&[ngenes]), x);
        ret.insert(ALPHA_G.into(), gene(2.0));
        ret.insert(BETA_G.into(), gene(1.0));
        ret.insert(GAMMA_G.into(), gene(0.5));
        ret.insert(T_GON.into(), gene(1.0));
        ret.insert(T_GOFF.into(), gene(8.0));
        ret.insert(
            S_G_GENE_ADD.into(),
            ArrayD::from_elem(IxDyn(&[1, ngenes, 2]), 0.1),
        );
        ret.insert(
            T_C.into(),
            Array1::linspace(0.0, 15.0, ncells).into_dyn(),
        );
        ret.insert(DETECTION_Y_CU.into(), ArrayD::ones(IxDyn(&[ncells])));
        ret.insert(DETECTION_Y_CS.into(), ArrayD::from_elem(IxDyn(&[ncells]), 2.0));
        ret
    }

    fn registry(ncells: usize, ngenes: usize) -> anyhow::Result<DataRegistry> {
        let mut adata = AnnData::with_default_names(ncells, ngenes)?;
        let counts = Array2::from_shape_fn((ncells, ngenes), |(i, j)| ((i + j) % 5) as f32);
        adata.set_layer("unspliced", Layer::Dense(counts.clone()))?;
        adata.set_layer("spliced", Layer::Dense(counts))?;
        Ok(setup_anndata(&mut adata, &SetupArgs::default())?)
    }

    #[test]
    fn summary_stat_names() -> anyhow::Result<()> {
        for stat in [SummaryStat::Means, SummaryStat::Stds, SummaryStat::Q05, SummaryStat::Q95] {
            assert_eq!(stat.to_string().parse::<SummaryStat>()?, stat);
        }
        assert!("median".parse::<SummaryStat>().is_err());
        Ok(())
    }

    #[test]
    fn subsample_is_clamped_to_the_cells() -> anyhow::Result<()> {
        let registry = registry(500, 3)?;
        let mut rng = StdRng::seed_from_u64(7);
        let qc = reconstruct(&summary(500, 3), &registry, Some(1000), &mut rng)?;

        assert_eq!(qc.cell_indices.len(), 500);
        let unique: HashSet<_> = qc.cell_indices.iter().collect();
        assert_eq!(unique.len(), 500);
        for m in 0..NUM_MODALITIES {
            assert_eq!(qc.expected[m].dim(), (500, 3));
            assert_eq!(qc.observed[m].dim(), (500, 3));
        }
        Ok(())
    }

    #[test]
    fn no_subsampling_keeps_cell_order() -> anyhow::Result<()> {
        let registry = registry(20, 2)?;
        let mut rng = StdRng::seed_from_u64(0);
        let qc = reconstruct(&summary(20, 2), &registry, None, &mut rng)?;
        assert_eq!(qc.cell_indices, (0..20).collect::<Vec<_>>());

        let small = reconstruct(&summary(20, 2), &registry, Some(5), &mut rng)?;
        assert_eq!(small.cell_indices.len(), 5);
        assert_eq!(small.expected[SPLICED].nrows(), 5);
        for (k, &c) in small.cell_indices.iter().enumerate() {
            assert_eq!(small.observed[UNSPLICED].row(k), qc.observed[UNSPLICED].row(c));
            assert_eq!(small.expected[SPLICED].row(k), qc.expected[SPLICED].row(c));
        }
        Ok(())
    }

    #[test]
    fn expected_counts_follow_the_forward_map() -> anyhow::Result<()> {
        let registry = registry(4, 2)?;
        let sites = summary(4, 2);
        let mu = compute_expected(&sites, &registry, &[0, 3])?;

        // cell 0 sits at t = 0, before the switch-on time
        assert_abs_diff_eq!(mu[(0, 0, UNSPLICED)], 0.1, epsilon = 1e-6);
        assert_abs_diff_eq!(mu[(0, 1, SPLICED)], 0.2, epsilon = 1e-6);

        let (u, s) = crate::kinetics::two_state_point(2.0, 1.0, 0.5, 1.0, 8.0, 15.0);
        assert_abs_diff_eq!(mu[(1, 0, UNSPLICED)], u + 0.1, epsilon = 1e-5);
        assert_abs_diff_eq!(mu[(1, 0, SPLICED)], 2.0 * (s + 0.1), epsilon = 1e-5);

        assert!(matches!(
            compute_expected(&sites, &registry, &[4]),
            Err(Cell2fateError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn sparse_counts_are_densified() -> anyhow::Result<()> {
        let mut coo = CooMatrix::new(6, 2);
        coo.push(1, 0, 3.0_f32);
        coo.push(4, 1, 1.0);
        let mut adata = AnnData::with_default_names(6, 2)?;
        adata.set_layer("unspliced", Layer::Sparse(CsrMatrix::from(&coo)))?;
        adata.set_layer("spliced", Layer::Sparse(CsrMatrix::from(&coo)))?;
        let registry = setup_anndata(&mut adata, &SetupArgs::default())?;

        let mut rng = StdRng::seed_from_u64(1);
        let qc = reconstruct(&summary(6, 2), &registry, None, &mut rng)?;
        assert_eq!(qc.observed[SPLICED][(1, 0)], 3.0);
        assert_eq!(qc.observed[SPLICED][(4, 1)], 1.0);
        assert_eq!(qc.observed[SPLICED].sum(), 4.0);
        Ok(())
    }

    #[test]
    fn correlation_of_identical_matrices_is_one() {
        let x = array![[0.0_f32, 1.0], [4.0, 9.0]];
        assert_abs_diff_eq!(log1p_correlation(&x, &x), 1.0, epsilon = 1e-6);
        assert!(log1p_correlation(&Array2::zeros((2, 2)), &x).is_nan());
    }
}
