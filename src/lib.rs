pub mod config;
pub mod session;
pub mod dashboard;
pub mod monitors;
pub mod escalation;
pub mod scheduler;

pub mod store;
pub mod notifications;
pub mod anomaly;
pub mod metrics_sink;

pub mod web;
pub mod version;

#[cfg(test)]
mod testing;
