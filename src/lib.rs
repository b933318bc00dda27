//! A Firestore-compatible document database layered on a MongoDB-class
//! storage engine (spec §1): typed values, dotted field paths, structured
//! queries, atomic writes and batches, security rules, and multitenant
//! catalog metadata — all addressed through the storage-capability traits in
//! [`storage`], never through `mongodb`/`bson` directly outside this crate.

pub mod catalog;
pub mod config;
pub mod document;
pub mod errors;
pub mod events;
pub mod index;
pub mod query;
pub mod repository;
pub mod rules;
pub mod storage;
pub mod value;
pub mod write;

pub use config::RepositoryConfig;
pub use document::{Document, DocumentAddress};
pub use errors::{ErrorKind, RepositoryError, RepositoryResult};
pub use repository::FirestoreRepository;
