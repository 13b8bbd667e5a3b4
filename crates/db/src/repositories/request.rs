use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use almox_core::domain::material::MaterialId;
use almox_core::domain::principal::UserId;
use almox_core::domain::request::{
    MaterialRequest, RequestFilter, RequestId, RequestItemId, RequestLineItem, RequestStatus,
    UnitId,
};

use super::{
    decode_optional_timestamp, decode_timestamp, encode_timestamp, RepositoryError,
    RequestRepository,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, requester_id, unit_id, status, notes, rejection_reason, \
     approver_id, fulfiller_id, created_at, approved_at, fulfilled_at, updated_at";

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_items(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RequestLineItem>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, material_id, requested_quantity, fulfilled_quantity, updated_at
             FROM request_item WHERE request_id = ? ORDER BY rowid ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_item).collect()
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<MaterialRequest, RepositoryError> {
        let mut request = row_to_request(row)?;
        request.items = self.load_items(&request.id).await?;
        Ok(request)
    }
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn decode_quantity(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column}: {value} is out of range")))
}

fn row_to_request(row: &SqliteRow) -> Result<MaterialRequest, RepositoryError> {
    let id: String = decode(row.try_get("id"))?;
    let requester_id: String = decode(row.try_get("requester_id"))?;
    let unit_id: String = decode(row.try_get("unit_id"))?;
    let status_raw: String = decode(row.try_get("status"))?;
    let notes: Option<String> = decode(row.try_get("notes"))?;
    let rejection_reason: Option<String> = decode(row.try_get("rejection_reason"))?;
    let approver_id: Option<String> = decode(row.try_get("approver_id"))?;
    let fulfiller_id: Option<String> = decode(row.try_get("fulfiller_id"))?;
    let created_at: String = decode(row.try_get("created_at"))?;
    let approved_at: Option<String> = decode(row.try_get("approved_at"))?;
    let fulfilled_at: Option<String> = decode(row.try_get("fulfilled_at"))?;
    let updated_at: String = decode(row.try_get("updated_at"))?;

    let status = RequestStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request status `{status_raw}`")))?;

    Ok(MaterialRequest {
        id: RequestId(id),
        requester_id: UserId(requester_id),
        unit_id: UnitId(unit_id),
        status,
        notes,
        rejection_reason,
        approver_id: approver_id.map(UserId),
        fulfiller_id: fulfiller_id.map(UserId),
        created_at: decode_timestamp("created_at", &created_at)?,
        approved_at: decode_optional_timestamp("approved_at", approved_at)?,
        fulfilled_at: decode_optional_timestamp("fulfilled_at", fulfilled_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
        items: Vec::new(),
    })
}

fn row_to_item(row: &SqliteRow) -> Result<RequestLineItem, RepositoryError> {
    let id: String = decode(row.try_get("id"))?;
    let request_id: String = decode(row.try_get("request_id"))?;
    let material_id: String = decode(row.try_get("material_id"))?;
    let requested_quantity: i64 = decode(row.try_get("requested_quantity"))?;
    let fulfilled_quantity: Option<i64> = decode(row.try_get("fulfilled_quantity"))?;
    let updated_at: String = decode(row.try_get("updated_at"))?;

    Ok(RequestLineItem {
        id: RequestItemId(id),
        request_id: RequestId(request_id),
        material_id: MaterialId(material_id),
        requested_quantity: decode_quantity("requested_quantity", requested_quantity)?,
        fulfilled_quantity: fulfilled_quantity
            .map(|value| decode_quantity("fulfilled_quantity", value))
            .transpose()?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &RequestFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(unit_id) = &filter.unit_id {
        builder.push(" AND unit_id = ").push_bind(unit_id.0.clone());
    }
    if let Some(requester_id) = &filter.requester_id {
        builder.push(" AND requester_id = ").push_bind(requester_id.0.clone());
    }
    if let Some(from) = &filter.created_from {
        builder.push(" AND created_at >= ").push_bind(encode_timestamp(from));
    }
    if let Some(to) = &filter.created_to {
        builder.push(" AND created_at <= ").push_bind(encode_timestamp(to));
    }
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<MaterialRequest>, RepositoryError> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM material_request WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_item_id(
        &self,
        item_id: &RequestItemId,
    ) -> Result<Option<MaterialRequest>, RepositoryError> {
        let request_id: Option<String> =
            sqlx::query_scalar("SELECT request_id FROM request_item WHERE id = ?")
                .bind(&item_id.0)
                .fetch_optional(&self.pool)
                .await?;

        match request_id {
            Some(request_id) => self.find_by_id(&RequestId(request_id)).await,
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        filter: &RequestFilter,
    ) -> Result<(Vec<MaterialRequest>, u64), RepositoryError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(1) FROM material_request");
        push_filters(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Sqlite>::new(format!("SELECT {REQUEST_COLUMNS} FROM material_request"));
        push_filters(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(filter.page_size()))
            .push(" OFFSET ")
            .push_bind(i64::try_from(filter.offset()).unwrap_or(i64::MAX));
        let rows = select.build().fetch_all(&self.pool).await?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            requests.push(self.hydrate(row).await?);
        }

        Ok((requests, u64::try_from(total).unwrap_or_default()))
    }

    async fn insert(&self, request: MaterialRequest) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO material_request ({REQUEST_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&request.id.0)
        .bind(&request.requester_id.0)
        .bind(&request.unit_id.0)
        .bind(request.status.as_str())
        .bind(&request.notes)
        .bind(&request.rejection_reason)
        .bind(request.approver_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.fulfiller_id.as_ref().map(|id| id.0.as_str()))
        .bind(encode_timestamp(&request.created_at))
        .bind(request.approved_at.as_ref().map(encode_timestamp))
        .bind(request.fulfilled_at.as_ref().map(encode_timestamp))
        .bind(encode_timestamp(&request.updated_at))
        .execute(&mut *tx)
        .await?;

        for item in &request.items {
            sqlx::query(
                "INSERT INTO request_item
                     (id, request_id, material_id, requested_quantity,
                      fulfilled_quantity, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&item.id.0)
            .bind(&request.id.0)
            .bind(&item.material_id.0)
            .bind(i64::from(item.requested_quantity))
            .bind(item.fulfilled_quantity.map(i64::from))
            .bind(encode_timestamp(&item.updated_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update(
        &self,
        request: MaterialRequest,
        expected: RequestStatus,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE material_request
             SET status = ?, notes = ?, rejection_reason = ?, approver_id = ?, fulfiller_id = ?,
                 approved_at = ?, fulfilled_at = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(request.status.as_str())
        .bind(&request.notes)
        .bind(&request.rejection_reason)
        .bind(request.approver_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.fulfiller_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.approved_at.as_ref().map(encode_timestamp))
        .bind(request.fulfilled_at.as_ref().map(encode_timestamp))
        .bind(encode_timestamp(&request.updated_at))
        .bind(&request.id.0)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::StaleState { id: request.id.0, expected });
        }

        for item in &request.items {
            sqlx::query(
                "UPDATE request_item SET fulfilled_quantity = ?, updated_at = ?
                 WHERE id = ? AND request_id = ?",
            )
            .bind(item.fulfilled_quantity.map(i64::from))
            .bind(encode_timestamp(&item.updated_at))
            .bind(&item.id.0)
            .bind(&request.id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_item_quantity(
        &self,
        request_id: &RequestId,
        item: &RequestLineItem,
        expected: RequestStatus,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let updated_at = encode_timestamp(&item.updated_at);

        let updated = sqlx::query(
            "UPDATE request_item SET fulfilled_quantity = ?, updated_at = ?
             WHERE id = ? AND request_id IN (
                 SELECT id FROM material_request WHERE id = ? AND status IN (?, ?)
             )",
        )
        .bind(item.fulfilled_quantity.map(i64::from))
        .bind(&updated_at)
        .bind(&item.id.0)
        .bind(&request_id.0)
        .bind(RequestStatus::Pending.as_str())
        .bind(RequestStatus::Approved.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::StaleState { id: request_id.0.clone(), expected });
        }

        sqlx::query("UPDATE material_request SET updated_at = ? WHERE id = ?")
            .bind(&updated_at)
            .bind(&request_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
