//! Provider integration: storage capabilities injected into models, unions,
//! and instances.
//!
//! A [`Provider`] is a value handle over a shared [`Client`]. Models and
//! unions constructed with a provider gain class-level read capabilities;
//! their instances gain write capabilities. Everything here delegates to the
//! client with the owning model attached, so the storage layer can encode
//! and decode items without further type information.

use std::sync::Arc;

use crate::client::{Client, Page, PaginateInput, QueryInput};
use crate::error::{Error, Result};
use crate::ops::{GetOp, LoadOptions, PutOptions, UpdateRawOptions};
use crate::types::{Item, Key};

use super::{Decoder, Instance, Model, Union};

/// Storage capabilities for models and unions: a shared client handle.
#[derive(Clone)]
pub struct Provider {
    client: Arc<Client>,
}

impl Provider {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("table", &self.client.table_name())
            .finish()
    }
}

// Class-level capabilities.
impl Model {
    /// Read one row by key; fails with `ItemNotFound` when absent.
    pub async fn get(&self, key: Key) -> Result<Instance> {
        let client = self.provider()?.client();
        client.get(&GetOp::new(self.clone(), key)).await
    }

    /// Read one row through the request coalescer.
    pub async fn load(&self, key: Key) -> Result<Instance> {
        let client = self.provider()?.client();
        let op = GetOp::new(self.clone(), key);
        match client.load(&op, LoadOptions::default()).await? {
            Some(instance) => Ok(instance),
            None => Err(Error::ItemNotFound { key: op.key }),
        }
    }

    /// Like [`Model::load`], resolving to `None` for missing rows.
    pub async fn load_nullable(&self, key: Key) -> Result<Option<Instance>> {
        let client = self.provider()?.client();
        let op = GetOp::new(self.clone(), key);
        client.load(&op, LoadOptions { null: true }).await
    }

    /// Raw store-level update; see `Client::update_raw` for the staleness
    /// caveat on derived key attributes.
    pub async fn update_raw(&self, key: Key, attributes: Item) -> Result<Instance> {
        self.update_raw_with(key, attributes, UpdateRawOptions::default())
            .await
    }

    pub async fn update_raw_with(
        &self,
        key: Key,
        attributes: Item,
        options: UpdateRawOptions,
    ) -> Result<Instance> {
        let client = self.provider()?.client();
        client.update_raw(self, &key, &attributes, &options).await
    }

    /// Query rows decoding as this model; rows that do not decode are
    /// skipped.
    pub async fn query(&self, input: &QueryInput) -> Result<Vec<Instance>> {
        let client = self.provider()?.client();
        client.query_as(input, &Decoder::Model(self.clone())).await
    }

    /// Slice a query of this model into a cursor-delimited page.
    pub async fn paginate(&self, input: &PaginateInput) -> Result<Page> {
        let client = self.provider()?.client();
        client.paginate(input, &Decoder::Model(self.clone())).await
    }
}

// Class-level capabilities, dispatching over the member set.
impl Union {
    pub async fn get(&self, key: Key) -> Result<Instance> {
        let client = self.provider()?.client();
        client.get(&GetOp::new(self.clone(), key)).await
    }

    pub async fn load(&self, key: Key) -> Result<Instance> {
        let client = self.provider()?.client();
        let op = GetOp::new(self.clone(), key);
        match client.load(&op, LoadOptions::default()).await? {
            Some(instance) => Ok(instance),
            None => Err(Error::ItemNotFound { key: op.key }),
        }
    }

    pub async fn load_nullable(&self, key: Key) -> Result<Option<Instance>> {
        let client = self.provider()?.client();
        let op = GetOp::new(self.clone(), key);
        client.load(&op, LoadOptions { null: true }).await
    }

    pub async fn query(&self, input: &QueryInput) -> Result<Vec<Instance>> {
        let client = self.provider()?.client();
        client.query_as(input, &Decoder::Union(self.clone())).await
    }

    pub async fn paginate(&self, input: &PaginateInput) -> Result<Page> {
        let client = self.provider()?.client();
        client.paginate(input, &Decoder::Union(self.clone())).await
    }
}

// Instance-level capabilities.
impl Instance {
    /// Write this instance with the default existence precondition. Returns
    /// the instance with its stored `_docVersion`.
    pub async fn put(&self) -> Result<Instance> {
        self.put_with(PutOptions::default()).await
    }

    pub async fn put_with(&self, options: PutOptions) -> Result<Instance> {
        let client = self.model().provider()?.client();
        client.put(self, options).await
    }

    /// In-place update with an optimistic version check; returns the
    /// replacement instance.
    pub async fn update(&self, attributes: Item) -> Result<Instance> {
        let client = self.model().provider()?.client();
        client.update(self, &attributes).await
    }

    /// Unconditionally remove this instance's row.
    pub async fn delete(&self) -> Result<()> {
        let client = self.model().provider()?.client();
        client.delete(&self.key()).await
    }

    /// Soft-delete this instance's row; returns the original instance.
    pub async fn soft_delete(&self) -> Result<Instance> {
        let client = self.model().provider()?.client();
        client.soft_delete(self).await
    }
}
