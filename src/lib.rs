pub mod app;
pub mod config;
pub mod deletion;
pub mod domain;
pub mod error;
pub mod output;
pub mod planner;
pub mod provisioner;
pub mod store;
