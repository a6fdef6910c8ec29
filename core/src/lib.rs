pub mod access;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod fingerprint;
pub mod index;
pub mod minhash;
pub mod normalize;
pub mod persist;
pub mod store;
pub mod tokenizer;

pub use error::{Error, Result};
pub use index::*;
