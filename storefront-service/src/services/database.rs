use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions, ReturnDocument},
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;
use std::time::Duration;

use super::error::ServiceError;
use super::store::{RefreshTokenStore, UserStore};
use crate::models::{PageRequest, RefreshToken, User, UserFilter, UserLookup, UserPatch};
use crate::utils::PasswordHashString;

const PASSWORD_FIELD: &str = "password_hash";

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for storefront-service");

        let user_indexes = [
            index("email_unique", doc! { "email": 1 }, true, false),
            index("phone_unique", doc! { "phone": 1 }, true, true),
            index(
                "email_verification_lookup",
                doc! { "email_verification.token_hash": 1 },
                false,
                true,
            ),
            index(
                "password_reset_lookup",
                doc! { "password_reset.token_hash": 1 },
                false,
                true,
            ),
            index("role_active_listing", doc! { "role": 1, "is_active": 1 }, false, false),
        ];
        self.raw_users()
            .create_indexes(user_indexes, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create indexes on users collection: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created indexes on users");

        let refresh_ttl = IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("expires_at_ttl".to_string())
                    .expire_after(Duration::from_secs(0))
                    .build(),
            )
            .build();
        let refresh_indexes = [
            index("token_hash_unique", doc! { "token_hash": 1 }, true, false),
            index("user_sessions", doc! { "user_id": 1 }, false, false),
            refresh_ttl,
        ];
        self.refresh_tokens()
            .create_indexes(refresh_indexes, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create indexes on refresh_tokens collection: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created indexes on refresh_tokens");

        Ok(())
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    fn raw_users(&self) -> Collection<Document> {
        self.db.collection("users")
    }

    pub fn refresh_tokens(&self) -> Collection<RefreshToken> {
        self.db.collection("refresh_tokens")
    }

    pub fn client(&self) -> &MongoClient {
        &self.client
    }
}

fn index(name: &str, keys: Document, unique: bool, sparse: bool) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(name.to_string())
                .unique(unique)
                .sparse(sparse)
                .build(),
        )
        .build()
}

fn without_password() -> Document {
    doc! { "password_hash": 0 }
}

fn lookup_filter(lookup: &UserLookup) -> Document {
    match lookup {
        UserLookup::Email(email) => doc! { "email": email.as_str() },
        UserLookup::Phone(phone) => doc! { "phone": phone.as_str() },
        UserLookup::EmailVerificationHash(hash) => doc! { "email_verification.token_hash": hash.as_str() },
        UserLookup::PasswordResetHash(hash) => doc! { "password_reset.token_hash": hash.as_str() },
    }
}

fn list_filter(filter: &UserFilter) -> Document {
    let mut query = Document::new();
    if let Some(role) = filter.role {
        query.insert("role", role.as_str());
    }
    if let Some(is_active) = filter.is_active {
        query.insert("is_active", is_active);
    }
    query
}

fn to_bson<T: serde::Serialize>(value: &T) -> Result<bson::Bson, ServiceError> {
    bson::to_bson(value).map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))
}

/// Builds the `$set` / `$unset` document for a patch.
fn update_document(patch: &UserPatch) -> Result<Document, ServiceError> {
    let mut set = Document::new();
    let mut unset = Document::new();

    if let Some(name) = &patch.name {
        set.insert("name", name.as_str());
    }
    if let Some(email) = &patch.email {
        set.insert("email", email.as_str());
    }
    if let Some(phone) = &patch.phone {
        set.insert("phone", phone.as_str());
    }
    if let Some(role) = patch.role {
        set.insert("role", role.as_str());
    }
    if let Some(is_active) = patch.is_active {
        set.insert("is_active", is_active);
    }
    if let Some(verified) = patch.email_verified {
        set.insert("email_verified", verified);
    }
    for (field, slot) in [
        ("email_verification", &patch.email_verification),
        ("password_reset", &patch.password_reset),
    ] {
        match slot {
            Some(Some(digest)) => {
                set.insert(field, to_bson(digest)?);
            }
            Some(None) => {
                unset.insert(field, "");
            }
            None => {}
        }
    }
    if let Some(hash) = &patch.password_hash {
        set.insert(PASSWORD_FIELD, hash.as_str());
    }
    set.insert("updated_at", bson::DateTime::from_chrono(Utc::now()));

    let mut update = doc! { "$set": set };
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }
    Ok(update)
}

/// Maps duplicate-key failures (code 11000) to a conflict naming the field.
fn map_write_error(err: mongodb::error::Error) -> ServiceError {
    let duplicate_message = match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == 11000 => Some(e.message.clone()),
        ErrorKind::Command(e) if e.code == 11000 => Some(e.message.clone()),
        _ => None,
    };

    match duplicate_message {
        Some(message) if message.contains("phone") => {
            ServiceError::Conflict("Phone already registered".to_string())
        }
        Some(message) if message.contains("email") => {
            ServiceError::Conflict("Email already registered".to_string())
        }
        Some(_) => ServiceError::Conflict("Duplicate record".to_string()),
        None => ServiceError::Database(err),
    }
}

#[async_trait]
impl UserStore for MongoDb {
    async fn create(
        &self,
        user: &User,
        password_hash: &PasswordHashString,
    ) -> Result<(), ServiceError> {
        let mut document =
            bson::to_document(user).map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        document.insert(PASSWORD_FIELD, password_hash.as_str());

        self.raw_users()
            .insert_one(document, None)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, ServiceError> {
        let options = FindOneOptions::builder()
            .projection(without_password())
            .build();
        Ok(self.users().find_one(doc! { "_id": id }, options).await?)
    }

    async fn find_by(&self, lookup: &UserLookup) -> Result<Option<User>, ServiceError> {
        let options = FindOneOptions::builder()
            .projection(without_password())
            .build();
        Ok(self.users().find_one(lookup_filter(lookup), options).await?)
    }

    async fn find_credentials(
        &self,
        email: &str,
    ) -> Result<Option<(User, PasswordHashString)>, ServiceError> {
        let Some(mut document) = self
            .raw_users()
            .find_one(doc! { "email": email }, None)
            .await?
        else {
            return Ok(None);
        };

        let hash = match document.remove(PASSWORD_FIELD) {
            Some(bson::Bson::String(hash)) => PasswordHashString::new(hash),
            _ => {
                return Err(ServiceError::Internal(anyhow::anyhow!(
                    "User record has no password hash"
                )))
            }
        };
        let user: User =
            bson::from_document(document).map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        Ok(Some((user, hash)))
    }

    async fn update(&self, id: &str, patch: &UserPatch) -> Result<Option<User>, ServiceError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .projection(without_password())
            .build();

        self.users()
            .find_one_and_update(doc! { "_id": id }, update_document(patch)?, options)
            .await
            .map_err(map_write_error)
    }

    async fn delete(&self, id: &str) -> Result<bool, ServiceError> {
        let result = self.users().delete_one(doc! { "_id": id }, None).await?;
        Ok(result.deleted_count > 0)
    }

    async fn list(
        &self,
        filter: &UserFilter,
        page: PageRequest,
    ) -> Result<(Vec<User>, u64), ServiceError> {
        let query = list_filter(filter);
        let total = self.users().count_documents(query.clone(), None).await?;

        let options = FindOptions::builder()
            .skip(page.skip())
            .limit(page.limit as i64)
            .sort(doc! { "created_at": -1, "_id": 1 })
            .projection(without_password())
            .build();
        let users: Vec<User> = self.users().find(query, options).await?.try_collect().await?;

        Ok((users, total))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                ServiceError::Database(e)
            })?;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for MongoDb {
    async fn insert(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        self.refresh_tokens()
            .insert_one(token, None)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, ServiceError> {
        Ok(self
            .refresh_tokens()
            .find_one(doc! { "token_hash": token_hash }, None)
            .await?)
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<bool, ServiceError> {
        let result = self
            .refresh_tokens()
            .delete_one(doc! { "token_hash": token_hash }, None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn delete_for_user(&self, user_id: &str) -> Result<u64, ServiceError> {
        let result = self
            .refresh_tokens()
            .delete_many(doc! { "user_id": user_id }, None)
            .await?;
        Ok(result.deleted_count)
    }
}
