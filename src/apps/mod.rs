//! Application specific collectors

pub mod kea;
