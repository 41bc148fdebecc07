//! Domain services sitting between the HTTP handlers and the models:
//! tier quota enforcement and multi-document cascade deletion.

pub mod cascade;
pub mod quota;

pub use cascade::CascadeReport;
