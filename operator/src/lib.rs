pub mod apply;
pub mod capabilities;
pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod event;
pub mod metrics;
pub mod naming;
pub mod object;
pub mod ownership;
pub mod reconcile;
pub mod render;
pub mod retry;
pub mod routing;
pub mod status;
pub mod values;
pub mod watch;

#[cfg(test)]
mod testing;
