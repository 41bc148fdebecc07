//! HTTP handlers, one module per resource.

pub mod entity;
pub mod group;
pub mod payment;
pub mod section;
pub mod subject;
pub mod user;
pub mod webhook;
