pub mod common_io;
pub mod ndarray_io;
pub mod ndarray_util;
pub mod sparse_util;
pub mod tensor_util;
pub mod traits;
pub mod utils;
