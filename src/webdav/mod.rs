//! WebDAV primitives: `PROPFIND`/`REPORT`/`PUT`/`DELETE` over hyper,
//! multistatus parsing, retries and authentication.

pub mod client;
pub mod types;
pub mod xml;

pub use client::{DavClient, PutOutcome};
pub use types::{Authorization, DavError, DavResult, Depth, Multistatus, MultistatusRow};
pub use xml::parse_multistatus;
