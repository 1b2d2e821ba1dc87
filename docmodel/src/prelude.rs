//! Convenient re-exports of commonly used types from docmodel.
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - The `Introspect` derive and trait, and the serde derives it pairs with
//! - The database, transaction and model handles
//! - Documents, queries and pagination
//! - Store backends, builders and error types

pub use serde::{Deserialize, Serialize};

pub use docmodel_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    document::{Map, to_document, to_entities, to_entity},
    error::{DocumentStoreError, DocumentStoreResult},
    id::SequentialIdGenerator,
    introspect::{Introspect, get_id, get_model_name, parse_model_indexes},
    model::Model,
    options::{DatabaseOptions, TxnOptions},
    page::{Page, PaginationParams},
    query::{Expr, Filter, Query, QueryBuilder, QueryVisitor, Sort, SortDirection},
    store::Database,
    txn::Txn,
};
pub use docmodel_macros::Introspect;
