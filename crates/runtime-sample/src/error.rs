#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] serde_json::Error),

    #[error("name must not be blank")]
    BlankName,

    #[error("heartbeat task ended abnormally: {0}")]
    TickerFailed(String),
}
