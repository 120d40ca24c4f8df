mod acquire;
mod fetch_actions;

pub use acquire::{AcquisitionConfig, AcquisitionCoordinator};
pub use fetch_actions::{FetchActionsUseCase, StatusClass, MAX_ATTEMPTS};
