use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuantizeError {
    #[error("image dimensions cannot be zero")]
    ZeroDimension,

    #[error("{method} cannot produce this palette: {reason}")]
    UnsupportedConfiguration {
        method: &'static str,
        reason: &'static str,
    },

    #[error("invalid palette: {0}")]
    InvalidPalette(&'static str),

    #[error("preview of {colours} colours at {square_size}px does not fit in memory")]
    PreviewTooLarge { colours: usize, square_size: usize },
}

impl QuantizeError {
    pub(crate) fn unsupported(method: &'static str, reason: &'static str) -> Self {
        Self::UnsupportedConfiguration { method, reason }
    }
}
