//! Update pipeline: manifest sources, decision, download, backup/apply/restore.

pub mod archive;
pub mod backup;
pub mod decision;
pub mod fetch;
pub mod installed;
pub mod log;
pub mod manager;
pub mod manifest;
pub mod media;
