pub use ndarray::prelude::*;

use crate::traits::*;
use num_traits::Float;

/// One-hot indicator matrix of group membership
///
/// * `membership` - group code of each element
/// * `num_groups` - total number of groups (codes must be smaller)
///
/// Returns an `n x num_groups` matrix with a single one per row.
pub fn one_hot_membership(membership: &[usize], num_groups: usize) -> anyhow::Result<Array2<f32>> {
    let mut ret = Array2::<f32>::zeros((membership.len(), num_groups));
    for (i, &k) in membership.iter().enumerate() {
        if k >= num_groups {
            anyhow::bail!("group code {} out of range ({} groups)", k, num_groups);
        }
        ret[(i, k)] = 1.0;
    }
    Ok(ret)
}

impl<T> MatTriplets for Array2<T>
where
    T: Float,
{
    type Mat = Self;
    type Scalar = T;

    fn from_nonzero_triplets(
        nrow: usize,
        ncol: usize,
        triplets: Vec<(usize, usize, Self::Scalar)>,
    ) -> anyhow::Result<Self::Mat> {
        let mut array = Array2::<T>::zeros((nrow, ncol));
        for (ii, jj, x_ij) in triplets {
            if ii >= nrow || jj >= ncol {
                anyhow::bail!("triplet ({}, {}) out of bound", ii, jj);
            }
            array[(ii, jj)] = x_ij;
        }
        Ok(array)
    }

    fn to_nonzero_triplets(
        &self,
    ) -> anyhow::Result<(usize, usize, Vec<(usize, usize, Self::Scalar)>)> {
        let (rows, cols) = self.dim();
        Ok((
            rows,
            cols,
            self.indexed_iter()
                .filter(|(_, x)| **x != T::zero())
                .map(|((i, j), &x)| (i, j, x))
                .collect(),
        ))
    }
}

impl RowsToDense for Array2<f32> {
    fn num_rows(&self) -> usize {
        self.nrows()
    }

    fn num_columns(&self) -> usize {
        self.ncols()
    }

    fn rows_to_dense(&self, rows: &[usize]) -> anyhow::Result<Array2<f32>> {
        if let Some(&r) = rows.iter().find(|&&r| r >= self.nrows()) {
            anyhow::bail!("row {} out of bound ({} rows)", r, self.nrows());
        }
        Ok(self.select(Axis(0), rows))
    }

    fn to_dense(&self) -> Array2<f32> {
        self.clone()
    }
}

impl CountOps for Array2<f32> {
    fn find_non_count(&self) -> Option<(usize, usize, f32)> {
        self.indexed_iter()
            .find(|(_, x)| !is_count(**x))
            .map(|((i, j), &x)| (i, j, x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_hot_rows_sum_to_one() -> anyhow::Result<()> {
        let oh = one_hot_membership(&[0, 2, 1, 2], 3)?;
        assert_eq!(oh.dim(), (4, 3));
        for row in oh.rows() {
            assert_eq!(row.sum(), 1.0);
        }
        assert_eq!(oh[(1, 2)], 1.0);
        assert!(one_hot_membership(&[3], 3).is_err());
        Ok(())
    }

    #[test]
    fn dense_count_check() {
        let good = array![[0.0_f32, 1.0], [3.0, 7.0]];
        assert!(good.is_count_data());

        let bad = array![[0.0_f32, 1.5], [3.0, 7.0]];
        assert_eq!(bad.find_non_count(), Some((0, 1, 1.5)));

        let negative = array![[0.0_f32, 1.0], [-3.0, 7.0]];
        assert!(!negative.is_count_data());
    }
}
