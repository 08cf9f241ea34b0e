//! Hardware-bound license activation and verification.

pub mod hardware;
pub mod record;
pub mod remote;
pub mod store;
pub mod verifier;
