pub mod dispatch;
pub mod pipeline;
pub mod round_controller;

pub use dispatch::{DispatchReport, Job, JobOutcome, UnitDispatcher};
pub use pipeline::{Pipeline, RunOutcome};
pub use round_controller::RoundController;
