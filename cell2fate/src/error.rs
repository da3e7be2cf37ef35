use thiserror::Error;

#[derive(Error, Debug)]
pub enum Cell2fateError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("shape mismatch for {site}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        site: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("posterior site {0} is missing")]
    MissingSite(String),

    #[error("layer {0} is missing")]
    MissingLayer(String),

    #[error("obs key {0} is missing")]
    MissingObsKey(String),

    #[error("layer {layer} does not contain count data: ({row}, {column}) = {value}")]
    InvalidCounts {
        layer: String,
        row: usize,
        column: usize,
        value: f32,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Cell2fateError>;
