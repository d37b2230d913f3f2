//! Run orchestration: one controller per process, triggered by the scheduler.

mod controller;
mod scheduler;

#[cfg(test)]
mod tests;

pub use controller::{RunController, RunReport};
pub use scheduler::{Scheduler, SchedulerStatus};
