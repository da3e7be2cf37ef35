use crate::common_io::Delimiter;
use candle_util::candle_core::{Device, Tensor};
use ndarray::Array2;

/// Convert to and from the vector of triplets
pub trait MatTriplets {
    type Mat;
    type Scalar;

    fn from_nonzero_triplets(
        nrow: usize,
        ncol: usize,
        triplets: Vec<(usize, usize, Self::Scalar)>,
    ) -> anyhow::Result<Self::Mat>;

    fn to_nonzero_triplets(
        &self,
    ) -> anyhow::Result<(usize, usize, Vec<(usize, usize, Self::Scalar)>)>;
}

/// Reading off from `Tensor`
pub trait ConvertMatOps {
    type Mat;
    type Scalar;

    fn from_tensor(_: &Tensor) -> anyhow::Result<Self::Mat>;
    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor>;
}

/// Row-oriented access to a cell x gene matrix, whether it is stored
/// densely or sparsely
pub trait RowsToDense {
    fn num_rows(&self) -> usize;
    fn num_columns(&self) -> usize;

    /// Dense `rows.len() x ncol` matrix of the selected rows, in the
    /// order given
    fn rows_to_dense(&self, rows: &[usize]) -> anyhow::Result<Array2<f32>>;

    fn to_dense(&self) -> Array2<f32> {
        let rows: Vec<usize> = (0..self.num_rows()).collect();
        self.rows_to_dense(&rows)
            .unwrap_or_else(|_| Array2::zeros((self.num_rows(), self.num_columns())))
    }
}

/// Checks for count semantics: finite, non-negative, integer-valued
pub trait CountOps {
    /// The first `(row, column, value)` that is not a count
    fn find_non_count(&self) -> Option<(usize, usize, f32)>;

    fn is_count_data(&self) -> bool {
        self.find_non_count().is_none()
    }
}

/// Read and write matrices from and to files
pub trait IoOps {
    type Scalar;
    type Mat;

    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat>;

    fn from_tsv(tsv_file: &str, skip: Option<usize>) -> anyhow::Result<Self::Mat> {
        Self::read_file_delim(tsv_file, "\t", skip)
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()>;

    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t")
    }

    fn to_csv(&self, csv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(csv_file, ",")
    }
}

#[inline]
pub(crate) fn is_count(x: f32) -> bool {
    x.is_finite() && x >= 0.0 && x.fract() == 0.0
}
