pub mod retry;
pub mod runner;
pub mod supervisor;

#[cfg(test)]
pub mod testing;

pub use retry::RetryPolicy;
pub use runner::Pipeline;
pub use supervisor::{JobSupervisor, SupervisorError};
