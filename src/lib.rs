//! Playbook - incident-response playbook engine
//!
//! Guides an operator through the step plan of an incident class/type,
//! records evidence, sub-steps and attachments per step, scores progress
//! (steps plus lessons learned) and renders an incident report.

pub mod blob;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod progress;
pub mod records;
pub mod report;
pub mod rest;
pub mod session;
pub mod store;

pub use engine::IncidentEngine;
pub use error::{EngineError, EngineResult};
