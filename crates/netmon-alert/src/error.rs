use crate::AlertState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Alert not found: {0}")]
    NotFound(String),

    #[error("Alert {id} cannot be {action} in state {state:?}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        state: AlertState,
    },

    #[error("Evaluation pipeline is closed")]
    PipelineClosed,
}

pub type Result<T> = std::result::Result<T, AlertError>;
