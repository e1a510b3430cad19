//! Document models, as seen by the reactor
//!
//! The reactor never interprets actions. Everything it knows about a document type goes through
//! the [`Reducer`] registered for it, and signatures come from a pluggable [`Signer`].

mod reducer;
mod signer;

pub use reducer::{DocumentModelRegistry, Reducer, ReducerError};
pub use signer::{KeyedHashSigner, Signer, SignerError};
