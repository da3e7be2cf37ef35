pub mod io;
pub mod summary;
pub mod traits;
