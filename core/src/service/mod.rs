//! Long lived services built on top of the infrastructure layer

pub mod sync;
