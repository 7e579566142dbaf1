pub mod config;
pub mod consumer;
pub mod error;
pub mod observability;
pub mod producer;
pub mod queue;
pub mod reading;
pub mod report;
pub mod store;

#[cfg(test)]
pub mod test_support;
