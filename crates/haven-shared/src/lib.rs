//! # haven-shared
//!
//! Domain types, wire protocol, and error taxonomy shared by the Haven
//! routing core, the persistence layer, and the relay server binary.

pub mod error;
pub mod protocol;
pub mod snapshot;
pub mod types;

pub use error::RouterError;
