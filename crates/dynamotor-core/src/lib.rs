//! # dynamotor
//!
//! A typed object-to-table access layer for DynamoDB-style wide-column
//! stores: a partitioned table with a `(PK, SK)` primary key and up to five
//! secondary `(GSInPK, GSInSK)` indexes.
//!
//! The crate binds validated record schemas to named models, translates
//! typed operations into store requests, enforces optimistic concurrency on
//! top of conditional puts, chains multi-chunk write transactions with
//! compensating rollback, and paginates queries behind encrypted opaque
//! cursors. The concrete store SDK and transport stay outside: any backend
//! implementing [`store::Store`] plugs in.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dynamotor_core::client::{Client, ClientConfig};
//! use dynamotor_core::codec::{Codec, Field, FieldType};
//! use dynamotor_core::model::{KeySpec, Model, Provider, key_component};
//! use dynamotor_sandbox::MemoryStore;
//! use serde_json::json;
//!
//! # async fn demo() -> dynamotor_core::error::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let client = Arc::new(Client::new(store, ClientConfig::new("app-table")));
//!
//! let contact = Model::with_provider(
//!     "Contact",
//!     Codec::record(vec![
//!         Field::required("email", FieldType::String),
//!         Field::required("name", FieldType::String),
//!     ]),
//!     KeySpec::new(
//!         |v| format!("CONTACT#{}", key_component(v, "email")),
//!         |_| "PROFILE#".to_string(),
//!     ),
//!     Provider::new(client),
//! );
//!
//! let saved = contact
//!     .from_value(&json!({"email": "ada@example.com", "name": "Ada"}))?
//!     .put()
//!     .await?;
//! assert_eq!(saved.doc_version(), Some(0));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod model;
pub mod ops;
pub mod store;
pub mod types;
