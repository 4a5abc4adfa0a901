//! Types shared between the machined library and its tooling.

pub mod errors;
pub mod power;

pub use errors::{MachinedError, MachinedResult};
pub use power::RebootCmd;
