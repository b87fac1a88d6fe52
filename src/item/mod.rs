//! Work items and crawl results
//!
//! Work items are the unit of distribution in acl-crawler. Each one is
//! serialized to JSON and placed on a queue; field names are part of the
//! wire contract between independently deployed workers.

mod acl;
mod types;

pub use acl::{AclEntry, AclKind};
pub use types::{
    file_name, join_path, CreateWorkItem, DirectoryResult, FileResult, VisitWorkItem,
};
