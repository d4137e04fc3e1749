//! Route handlers for the REST API.

pub mod catalog;
pub mod health;
pub mod incidents;
pub mod session;
pub mod steps;
