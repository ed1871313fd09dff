#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    #[error("worker pool has shut down")]
    PoolClosed,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
