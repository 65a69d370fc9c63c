//! Job lifecycle: the state machine, the controller that drives it, and
//! status reporting.

pub mod controller;
pub mod process;
pub mod state;
pub mod status;

pub use controller::{JobController, PassReport};
pub use state::JobState;
pub use status::{format_bytes, JobStatus};
