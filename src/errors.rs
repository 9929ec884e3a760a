use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stream endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Stream reported error: {0}")]
    Remote(String),

    #[error("Token receiver dropped mid-stream")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected case {case_id} with status {status}")]
    Rejected { case_id: String, status: u16 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
