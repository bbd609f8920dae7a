#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A filter range with `min > max` (or a NaN bound).
    InvalidRange {
        field: &'static str,
        min: f64,
        max: f64,
    },
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { field, min, max } => {
                write!(f, "invalid {field} range: min {min} is greater than max {max}")
            }
        }
    }
}

impl std::error::Error for EngineError {}
