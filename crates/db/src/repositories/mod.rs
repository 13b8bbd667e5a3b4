use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use almox_core::domain::material::{Material, MaterialId};
use almox_core::domain::principal::{Principal, UserId};
use almox_core::domain::request::{
    MaterialRequest, RequestFilter, RequestId, RequestItemId, RequestLineItem, RequestStatus,
};

pub mod audit;
pub mod material;
pub mod memory;
pub mod principal;
pub mod request;

pub use audit::{SqlAuditRepository, SqlAuditSink};
pub use material::SqlMaterialRepository;
pub use memory::{
    InMemoryMaterialRepository, InMemoryPrincipalDirectory, InMemoryRequestRepository,
};
pub use principal::SqlPrincipalDirectory;
pub use request::SqlRequestRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("request `{id}` is no longer in status {}", expected.as_str())]
    StaleState { id: String, expected: RequestStatus },
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<MaterialRequest>, RepositoryError>;

    /// Loads the whole request that owns the given line item.
    async fn find_by_item_id(
        &self,
        item_id: &RequestItemId,
    ) -> Result<Option<MaterialRequest>, RepositoryError>;

    /// Returns one page of matches, newest first, plus the total match count.
    async fn list(
        &self,
        filter: &RequestFilter,
    ) -> Result<(Vec<MaterialRequest>, u64), RepositoryError>;

    async fn insert(&self, request: MaterialRequest) -> Result<(), RepositoryError>;

    /// Persists the request and its items only if the stored status still equals `expected`.
    /// Fails with [`RepositoryError::StaleState`] otherwise.
    async fn update(
        &self,
        request: MaterialRequest,
        expected: RequestStatus,
    ) -> Result<(), RepositoryError>;

    /// Writes one line's fulfilled quantity and nothing else, provided the owning request still
    /// accepts quantity edits. Fails with [`RepositoryError::StaleState`] otherwise.
    async fn update_item_quantity(
        &self,
        request_id: &RequestId,
        item: &RequestLineItem,
        expected: RequestStatus,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MaterialRepository: Send + Sync {
    async fn find_by_id(&self, id: &MaterialId) -> Result<Option<Material>, RepositoryError>;
    async fn save(&self, material: Material) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<Principal>, RepositoryError>;
    async fn save(&self, principal: Principal) -> Result<(), RepositoryError>;
}

/// Fixed-width RFC 3339 so that stored timestamps also sort lexically.
pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn decode_optional_timestamp(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|value| decode_timestamp(column, &value)).transpose()
}
