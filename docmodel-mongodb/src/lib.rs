//! MongoDB backend implementation for docmodel.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait on top of
//! the official async driver.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docmodel = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data lives in a self-hosted MongoDB deployment or Atlas
//! - **Transactions** - Multi-document transactions on client sessions, reading from the primary
//! - **Indexing** - Index listing and creation with the server's default names
//! - **Error codes** - Server error codes are kept, so duplicate keys are recognized
//!
//! Multi-document transactions need a replica set or a sharded cluster.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{backend::StoreBackendBuilder, mongodb::MongoDbStore, store::Database};
//!
//! let store = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!     .build()
//!     .await?;
//!
//! let db = Database::new(store);
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_mongodb;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
