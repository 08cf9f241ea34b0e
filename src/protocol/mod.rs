//! Wire formats exchanged with update and license servers.

pub mod models;
