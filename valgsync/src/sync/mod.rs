pub mod probe;
pub mod retry;
pub mod scheduler;
pub mod task;
pub mod version;

#[cfg(test)]
pub(crate) mod fake;
