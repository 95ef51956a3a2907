//! SOCI Registry CLI - resolve, pull and push OCI artifact graphs.

pub mod commands;
pub mod image;
