//! Side-effecting collaborators and storage for the controller.

pub mod action;
pub mod blob_store;
pub mod capture;
pub mod config;
pub mod focus;
pub mod predicate;
pub mod process;
pub mod report;
pub mod session_log;
pub mod template;
