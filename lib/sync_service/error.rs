use thiserror::Error;

use crate::store::StoreError;
use crate::sync_engine::PlanningError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Request problems are the caller's fault; everything else is a failed run.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}
