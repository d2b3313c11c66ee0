#![deny(missing_docs)]
/*!
# Warehouse-rs

Warehouse-rs is a versioned, schema-aware data warehouse core for
heterogeneous upstream data feeds.

Each logical feed (a [collection](model::registry::CollectionEntry) within
a database) ingests successive source files sharing a caller-declared
primary key. The [engine](warehouse::Warehouse) stores every distinct
version, indexes each version by user-supplied temporal fields, and binds
each source version to at most one parsed file per registered parser.

The engine sits between the public operations and two backing services:
an [object store](store::objects) for file bodies and an
[indexed key-value store](store::index) for metadata rows. The key-value
store is a seam ([store::index::IndexStore]) with an in-process
implementation ([store::memory::MemoryIndexStore]); file bodies go through
the `object_store` crate, so any of its backends work.

Currently supported:
* Collection and parser registration with a TTL-cached registry.
* Versioned source file storage with duplicate suppression.
* Parsed file storage bound to source versions.
* Retrieval by key, key + version, or time range over two indexes.
* Metadata updates and deletes with deferred multi-version deletion.

*/
pub mod config;
pub mod error;
pub mod file;
pub mod keys;
pub mod model;
pub mod registry;
pub mod store;
pub mod warehouse;

pub use object_store;
