//! Hashing, token derivation and local sealing.

pub mod derive;
pub mod digest;
pub mod sealed;
pub mod secret;
