use crate::traits::*;
use candle_util::candle_core::{Device, Tensor};
use ndarray::Array2;

impl ConvertMatOps for Array2<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn from_tensor(tensor: &Tensor) -> anyhow::Result<Self::Mat> {
        let (nrow, ncol) = tensor.dims2()?;
        let data: Vec<f32> = tensor
            .to_device(&Device::Cpu)?
            .flatten_all()?
            .to_vec1()?;
        Ok(Array2::from_shape_vec((nrow, ncol), data)?)
    }

    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor> {
        let data: Vec<f32> = self.iter().copied().collect();
        Ok(Tensor::from_vec(data, self.dim(), dev)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn tensor_conversion_keeps_row_major_layout() -> anyhow::Result<()> {
        let xx = array![[1.0_f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let tt = xx.to_tensor(&Device::Cpu)?;
        assert_eq!(tt.dims(), &[2, 3]);
        assert_eq!(tt.to_vec2::<f32>()?[1][0], 4.0);

        let yy = Array2::<f32>::from_tensor(&tt.t()?)?;
        assert_eq!(yy.dim(), (3, 2));
        assert_eq!(yy[(0, 1)], 4.0);
        Ok(())
    }
}
