//! Shared HTTP plumbing: hyper client construction and response
//! decompression.

pub mod compression;
pub mod http;
