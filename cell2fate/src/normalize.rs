use crate::anndata::{AnnData, Layer, SlotUpdate};
use crate::error::{Cell2fateError, Result};
use crate::registry::DataRegistry;
use crate::sites::*;

use log::{debug, warn};
use matrix_param::summary::SiteMap;
use matrix_util::ndarray_util::one_hot_membership;
use matrix_util::traits::RowsToDense;
use ndarray::prelude::*;

/// Detection efficiencies below this are reported
pub const MIN_DETECTION: f32 = 1e-6;

/// Fraction of negative corrected entries beyond which the shift to
/// zero is reported
pub const NEGATIVE_FRACTION_WARN: f32 = 0.01;

/// Output layer names, in modality order
pub const NORM_LAYERS: [&str; NUM_MODALITIES] = ["unspliced_norm", "spliced_norm"];

/// Counts corrected for detection efficiency and additive background
///
/// For each modality `m`:
/// ```text
/// corrected = raw[m] / detection[m] - onehot(batch) * s_g_gene_add[:, :, m]
/// ```
/// shifted by its global minimum so that nothing is negative. The shift
/// is a floor, not a truncated likelihood; heavy shifting is logged.
///
/// * `means` - posterior summary with `detection_y_cu`, `detection_y_cs`
///   and `s_g_gene_add`
/// * `registry` - raw counts and batch membership
/// * `adata` - receives `unspliced_norm` and `spliced_norm`
pub fn normalize(means: &SiteMap, registry: &DataRegistry, adata: &mut AnnData) -> Result<()> {
    let mut update = SlotUpdate::new();
    stage_normalized(means, registry, &mut update)?;
    adata.apply(update)
}

/// Stage both normalized layers without touching any `AnnData`
pub fn stage_normalized(
    means: &SiteMap,
    registry: &DataRegistry,
    update: &mut SlotUpdate,
) -> Result<()> {
    for (m, corrected) in normalized_counts(means, registry)?.into_iter().enumerate() {
        update.layer(NORM_LAYERS[m], Layer::Dense(corrected));
    }
    Ok(())
}

/// Normalized unspliced and spliced counts, in modality order
pub fn normalized_counts(
    means: &SiteMap,
    registry: &DataRegistry,
) -> Result<[Array2<f32>; NUM_MODALITIES]> {
    let dims = ModelDims::from(registry.summary_stats());
    dims.validate(means)?;

    let membership = one_hot_membership(registry.batch_codes()?, dims.n_batch)?;
    let gene_add = require_dim::<Ix3>(means, S_G_GENE_ADD)?;

    let corrected = |m: usize, site: &str, raw: &Layer| -> Result<Array2<f32>> {
        let detection = require_dim::<Ix1>(means, site)?;
        let background = membership.dot(&gene_add.slice(s![.., .., m]));
        correct_counts(&raw.to_dense(), detection, &background, site)
    };

    Ok([
        corrected(UNSPLICED, DETECTION_Y_CU, registry.unspliced()?)?,
        corrected(SPLICED, DETECTION_Y_CS, registry.spliced()?)?,
    ])
}

/// `raw / detection[:, None] - background`, shifted to a zero minimum
fn correct_counts(
    raw: &Array2<f32>,
    detection: ArrayView1<f32>,
    background: &Array2<f32>,
    site: &str,
) -> Result<Array2<f32>> {
    if raw.dim() != background.dim() || raw.nrows() != detection.len() {
        return Err(Cell2fateError::ShapeMismatch {
            site: site.into(),
            expected: vec![raw.nrows()],
            found: vec![detection.len()],
        });
    }

    let tiny = detection.iter().filter(|&&d| d.abs() < MIN_DETECTION).count();
    if tiny > 0 {
        warn!(
            "{}: {} cell(s) with detection efficiency below {:e}; normalized counts may blow up",
            site, tiny, MIN_DETECTION
        );
    }

    let mut corrected = raw / &detection.insert_axis(Axis(1)) - background;

    let negative = corrected.iter().filter(|&&x| x < 0.0).count();
    let fraction = negative as f32 / corrected.len().max(1) as f32;
    if fraction > NEGATIVE_FRACTION_WARN {
        warn!(
            "{}: {:.1}% of corrected counts were negative before shifting to zero",
            site,
            100.0 * fraction
        );
    }

    let non_finite = corrected.iter().filter(|x| !x.is_finite()).count();
    if non_finite > 0 {
        warn!(
            "{}: {} corrected count(s) are not finite; they stay NaN or infinite in the output",
            site, non_finite
        );
    }

    let min = corrected
        .iter()
        .copied()
        .filter(|x| x.is_finite())
        .fold(f32::INFINITY, f32::min);
    if min.is_finite() {
        debug!("{}: shifting corrected counts by {}", site, -min);
        corrected -= min;
    }
    Ok(corrected)
}
