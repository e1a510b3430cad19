//! Infrastructure layer: scheduling, persistence and eventing

pub mod cache;
pub mod db;
pub mod event;
pub mod job;
pub mod queue;
pub mod store;
pub mod stream;
