//! Database entities

pub mod document_snapshot;
pub mod keyframe;
pub mod listener;
pub mod listener_cursor;
pub mod operation;
