use rand::prelude::SliceRandom;
use rand::Rng;

/// Generate minibatch intervals
/// * `ntot` - number of total samples
/// * `batch_size` - the size of each batch
pub fn generate_minibatch_intervals(ntot: usize, batch_size: usize) -> Vec<(usize, usize)> {
    let batch_size = batch_size.max(1);
    let num_batches = ntot.div_ceil(batch_size);
    (0..num_batches)
        .map(|b| {
            let lb: usize = b * batch_size;
            let ub: usize = ((b + 1) * batch_size).min(ntot);
            (lb, ub)
        })
        .collect::<Vec<_>>()
}

/// Randomly split `0..ntot` into training and held-out indexes
/// * `ntot` - number of total samples
/// * `train_frac` - fraction of samples in the training set
/// * `rng` - random number generator
///
/// The training set keeps at least one sample whenever `ntot > 0`.
pub fn split_train_validation<R: Rng + ?Sized>(
    ntot: usize,
    train_frac: f32,
    rng: &mut R,
) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..ntot).collect();
    if train_frac >= 1.0 {
        return (idx, vec![]);
    }
    idx.shuffle(rng);
    let ntrain = ((ntot as f32) * train_frac.max(0.0)).round() as usize;
    let ntrain = ntrain.clamp(ntot.min(1), ntot);
    let valid = idx.split_off(ntrain);
    (idx, valid)
}
