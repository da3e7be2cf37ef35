use crate::traits::*;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::Array2;
use rayon::prelude::*;

impl MatTriplets for CsrMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn from_nonzero_triplets(
        nrow: usize,
        ncol: usize,
        triplets: Vec<(usize, usize, Self::Scalar)>,
    ) -> anyhow::Result<Self::Mat> {
        let mut coo = CooMatrix::<f32>::new(nrow, ncol);
        for (ii, jj, x_ij) in triplets {
            if ii >= nrow || jj >= ncol {
                anyhow::bail!("triplet ({}, {}) out of bound", ii, jj);
            }
            coo.push(ii, jj, x_ij);
        }
        Ok(CsrMatrix::from(&coo))
    }

    fn to_nonzero_triplets(
        &self,
    ) -> anyhow::Result<(usize, usize, Vec<(usize, usize, Self::Scalar)>)> {
        Ok((
            self.nrows(),
            self.ncols(),
            self.triplet_iter()
                .map(|(i, j, &x_ij)| (i, j, x_ij))
                .collect(),
        ))
    }
}

impl RowsToDense for CsrMatrix<f32> {
    fn num_rows(&self) -> usize {
        self.nrows()
    }

    fn num_columns(&self) -> usize {
        self.ncols()
    }

    fn rows_to_dense(&self, rows: &[usize]) -> anyhow::Result<Array2<f32>> {
        let ncol = self.ncols();
        let mut ret = Array2::<f32>::zeros((rows.len(), ncol));

        ret.outer_iter_mut()
            .into_par_iter()
            .zip(rows.par_iter())
            .try_for_each(|(mut out_i, &r)| -> anyhow::Result<()> {
                let row = self
                    .get_row(r)
                    .ok_or_else(|| anyhow::anyhow!("row {} out of bound", r))?;
                for (&j, &x_ij) in row.col_indices().iter().zip(row.values()) {
                    out_i[j] += x_ij;
                }
                Ok(())
            })?;

        Ok(ret)
    }
}

impl CountOps for CsrMatrix<f32> {
    fn find_non_count(&self) -> Option<(usize, usize, f32)> {
        self.triplet_iter()
            .find(|(_, _, x)| !is_count(**x))
            .map(|(i, j, &x)| (i, j, x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_csr() -> anyhow::Result<CsrMatrix<f32>> {
        CsrMatrix::from_nonzero_triplets(
            3,
            4,
            vec![(0, 1, 2.0), (1, 0, 1.0), (1, 3, 5.0), (2, 2, 7.0)],
        )
    }

    #[test]
    fn sparse_rows_to_dense_keeps_order() -> anyhow::Result<()> {
        let csr = toy_csr()?;
        let dense = csr.rows_to_dense(&[2, 0])?;
        assert_eq!(dense.dim(), (2, 4));
        assert_eq!(dense[(0, 2)], 7.0);
        assert_eq!(dense[(1, 1)], 2.0);
        assert_eq!(dense.sum(), 9.0);
        assert!(csr.rows_to_dense(&[3]).is_err());
        Ok(())
    }

    #[test]
    fn sparse_full_dense_matches_triplets() -> anyhow::Result<()> {
        let csr = toy_csr()?;
        let dense = csr.to_dense();
        let (nrow, ncol, triplets) = csr.to_nonzero_triplets()?;
        assert_eq!((nrow, ncol), dense.dim());
        for (i, j, x) in triplets {
            assert_eq!(dense[(i, j)], x);
        }
        assert!(csr.is_count_data());
        Ok(())
    }
}
