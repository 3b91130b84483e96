//! MongoDB connection and a typed collection with conditional writes

use std::time::Duration;

use bson::{doc, DateTime, Document};
use mongodb::{
    options::{ClientOptions, IndexOptions, ReturnDocument, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::db::schemas::Metadata;
use crate::types::SignerError;

/// Server selection and connect timeout unless the URI sets its own
const STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Index definitions a schema wants applied at startup
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Access to a schema's timestamps so writes can stamp them
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and ping; fails fast if the server is unreachable
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, SignerError> {
        info!("Connecting to MongoDB");

        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| SignerError::Config(format!("Invalid MongoDB URI: {}", e)))?;
        options.app_name.get_or_insert_with(|| "cosigner".to_string());
        options.server_selection_timeout.get_or_insert(STARTUP_TIMEOUT);
        options.connect_timeout.get_or_insert(STARTUP_TIMEOUT);

        let client = Client::with_options(options)
            .map_err(|e| SignerError::Database(format!("Failed to create MongoDB client: {}", e)))?;

        let database = client.database(db_name);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| SignerError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!(database = %database.name(), "Connected to MongoDB");

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection, creating its indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, SignerError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }
}

/// Collection of `T` whose indexes are ensured on open
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, SignerError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    async fn apply_indexes(&self) -> Result<(), SignerError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| SignerError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert `item` only if nothing matches `filter`.
    ///
    /// Returns `true` if a document was inserted. A concurrent insert that
    /// trips a unique index counts as "already present".
    pub async fn insert_if_absent(&self, filter: Document, mut item: T) -> Result<bool, SignerError> {
        let metadata = item.mut_metadata();
        metadata.created_at.get_or_insert_with(DateTime::now);
        metadata.updated_at = Some(DateTime::now());

        let document = bson::to_document(&item)?;

        match self
            .inner
            .update_one(filter, doc! { "$setOnInsert": document })
            .upsert(true)
            .await
        {
            Ok(result) => Ok(result.upserted_id.is_some()),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(SignerError::Database(format!("Insert failed: {}", e))),
        }
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, SignerError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| SignerError::Database(format!("Find failed: {}", e)))
    }

    /// Conditionally update one document and return it as written, or `None`
    /// if the filter matched nothing.
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<Option<T>, SignerError> {
        self.inner
            .find_one_and_update(filter, touch(update))
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| SignerError::Database(format!("Update failed: {}", e)))
    }

    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult, SignerError> {
        self.inner
            .update_one(filter, UpdateModifications::Document(touch(update)))
            .await
            .map_err(|e| SignerError::Database(format!("Update failed: {}", e)))
    }
}

/// Stamp `metadata.updated_at` into a `$set` stage
fn touch(mut update: Document) -> Document {
    match update.get_document_mut("$set") {
        Ok(set) => {
            set.insert("metadata.updated_at", DateTime::now());
        }
        Err(_) => {
            update.insert("$set", doc! { "metadata.updated_at": DateTime::now() });
        }
    }
    update
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_merges_into_existing_set() {
        let update = touch(doc! { "$set": { "is_used": true }, "$inc": { "version": 1 } });
        let set = update.get_document("$set").unwrap();
        assert!(set.get_bool("is_used").unwrap());
        assert!(set.get_datetime("metadata.updated_at").is_ok());
        assert!(update.get_document("$inc").is_ok());
    }

    #[test]
    fn test_touch_adds_set_stage() {
        let update = touch(doc! { "$inc": { "attempts": 1 } });
        assert!(update
            .get_document("$set")
            .unwrap()
            .get_datetime("metadata.updated_at")
            .is_ok());
    }
}
