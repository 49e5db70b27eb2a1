//! Endpoint handlers, one module per resource.

pub mod configs;
pub mod download;
pub mod health;
pub mod ledger;
pub mod release;
pub mod rollout;
pub mod upload;
