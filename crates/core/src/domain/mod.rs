pub mod proposal;
pub mod task;
pub mod workflow;
