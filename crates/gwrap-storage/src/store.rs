use std::collections::BTreeMap;

use sea_orm::sea_query::Index;
use sea_orm::{
    ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Schema,
};
use serde::Serialize;
use time::OffsetDateTime;
use time::macros::format_description;

use gwrap_protocol::gemini::GenerateContentResponse;

use crate::audit::AuditRecord;
use crate::entities;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Aggregate view over the audit trail for the admin API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub cache_hits: i64,
    pub total_cost: f64,
    pub avg_response_time_ms: i64,
}

/// Listing row; request and response bodies are deliberately excluded.
#[derive(Debug, Clone, FromQueryResult, Serialize)]
pub struct AuditSummary {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub model: String,
    pub status_code: i32,
    pub success: bool,
    pub error: Option<String>,
    pub cost_total: f64,
    pub temperature: f64,
    pub key_source: String,
    pub cache_hit: bool,
    pub request_hash: String,
    pub duration_ms: i64,
    pub total_tokens: i32,
    pub is_vision: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PagedAudit {
    pub requests: Vec<AuditSummary>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBucket {
    Hour,
    Day,
}

impl TimeBucket {
    fn label(self, at: OffsetDateTime) -> String {
        let formatted = match self {
            TimeBucket::Hour => at.format(format_description!("[year]-[month]-[day] [hour]:00")),
            TimeBucket::Day => at.format(format_description!("[year]-[month]-[day]")),
        };
        formatted.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeSeriesPoint {
    pub timestamp: String,
    pub count: i64,
}

#[derive(Debug, FromQueryResult)]
struct CostDurationRow {
    total_cost: Option<f64>,
    duration_sum: Option<i64>,
}

#[derive(Debug, FromQueryResult)]
struct TimestampRow {
    timestamp: OffsetDateTime,
}

/// Audit store on SeaORM. Doubles as the slow cache tier: a successful row
/// for a fingerprint is a valid cached response for that fingerprint.
#[derive(Clone)]
pub struct RequestStore {
    db: DatabaseConnection,
}

impl RequestStore {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Entity-first schema sync plus the two lookup indexes: the slow-tier
    /// probe `(request_hash, success)` and the admin listing order
    /// `timestamp`.
    pub async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::RequestLogs)
            .sync(&self.db)
            .await?;

        use entities::request_logs::Column;
        let statements = vec![
            Index::create()
                .name("idx_request_logs_hash_success")
                .table(entities::request_logs::Entity)
                .col(Column::RequestHash)
                .col(Column::Success)
                .if_not_exists()
                .to_owned(),
            Index::create()
                .name("idx_request_logs_timestamp")
                .table(entities::request_logs::Entity)
                .col(Column::Timestamp)
                .if_not_exists()
                .to_owned(),
        ];
        for statement in statements {
            self.db.execute(&statement).await?;
        }
        Ok(())
    }

    pub async fn append(&self, record: AuditRecord) -> StorageResult<()> {
        use entities::request_logs::ActiveModel;

        let response_json = match &record.response {
            Some(response) => Some(serde_json::to_value(response)?),
            None => None,
        };
        let active = ActiveModel {
            id: ActiveValue::NotSet,
            timestamp: ActiveValue::Set(record.timestamp),
            model: ActiveValue::Set(record.model),
            request_json: ActiveValue::Set(serde_json::to_value(&record.request)?),
            response_json: ActiveValue::Set(response_json),
            status_code: ActiveValue::Set(i32::from(record.status_code)),
            success: ActiveValue::Set(record.success),
            error: ActiveValue::Set(record.error),
            cost_input: ActiveValue::Set(record.cost_input),
            cost_output: ActiveValue::Set(record.cost_output),
            cost_total: ActiveValue::Set(record.cost_total),
            temperature: ActiveValue::Set(record.temperature),
            key_source: ActiveValue::Set(record.key_source.as_str().to_string()),
            cache_hit: ActiveValue::Set(record.cache_hit),
            request_hash: ActiveValue::Set(record.request_hash),
            duration_ms: ActiveValue::Set(record.duration_ms),
            prompt_tokens: ActiveValue::Set(i32::try_from(record.prompt_tokens).unwrap_or(i32::MAX)),
            output_tokens: ActiveValue::Set(i32::try_from(record.output_tokens).unwrap_or(i32::MAX)),
            total_tokens: ActiveValue::Set(i32::try_from(record.total_tokens).unwrap_or(i32::MAX)),
            is_vision: ActiveValue::Set(record.is_vision),
        };
        entities::RequestLogs::insert(active).exec(&self.db).await?;
        Ok(())
    }

    /// Most recent successful response persisted for this fingerprint.
    pub async fn find_cached(
        &self,
        request_hash: &str,
    ) -> StorageResult<Option<GenerateContentResponse>> {
        use entities::request_logs::Column;

        let row = entities::RequestLogs::find()
            .filter(Column::RequestHash.eq(request_hash))
            .filter(Column::Success.eq(true))
            .order_by_desc(Column::Timestamp)
            .one(&self.db)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let Some(response_json) = row.response_json else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(response_json)?))
    }

    pub async fn stats(&self, since: OffsetDateTime) -> StorageResult<AuditStats> {
        use entities::request_logs::Column;

        let window = || entities::RequestLogs::find().filter(Column::Timestamp.gte(since));

        let total = window().count(&self.db).await?;
        let successful = window()
            .filter(Column::Success.eq(true))
            .count(&self.db)
            .await?;
        let cache_hits = window()
            .filter(Column::CacheHit.eq(true))
            .count(&self.db)
            .await?;

        let aggregate = window()
            .select_only()
            .column_as(Column::CostTotal.sum(), "total_cost")
            .column_as(Column::DurationMs.sum(), "duration_sum")
            .into_model::<CostDurationRow>()
            .one(&self.db)
            .await?
            .unwrap_or(CostDurationRow {
                total_cost: None,
                duration_sum: None,
            });

        let avg_response_time_ms = if total > 0 {
            aggregate.duration_sum.unwrap_or(0) / i64::try_from(total).unwrap_or(i64::MAX)
        } else {
            0
        };

        Ok(AuditStats {
            total_requests: i64::try_from(total).unwrap_or(i64::MAX),
            successful_requests: i64::try_from(successful).unwrap_or(i64::MAX),
            failed_requests: i64::try_from(total - successful).unwrap_or(i64::MAX),
            cache_hits: i64::try_from(cache_hits).unwrap_or(i64::MAX),
            total_cost: aggregate.total_cost.unwrap_or(0.0),
            avg_response_time_ms,
        })
    }

    pub async fn recent(&self, page: u64, per_page: u64) -> StorageResult<PagedAudit> {
        use entities::request_logs::Column;

        let total = entities::RequestLogs::find().count(&self.db).await?;
        let total_pages = total.div_ceil(per_page.max(1));

        let requests = entities::RequestLogs::find()
            .select_only()
            .column(Column::Id)
            .column(Column::Timestamp)
            .column(Column::Model)
            .column(Column::StatusCode)
            .column(Column::Success)
            .column(Column::Error)
            .column(Column::CostTotal)
            .column(Column::Temperature)
            .column(Column::KeySource)
            .column(Column::CacheHit)
            .column(Column::RequestHash)
            .column(Column::DurationMs)
            .column(Column::TotalTokens)
            .column(Column::IsVision)
            .order_by_desc(Column::Timestamp)
            .order_by_desc(Column::Id)
            .offset(page.saturating_sub(1) * per_page)
            .limit(per_page)
            .into_model::<AuditSummary>()
            .all(&self.db)
            .await?;

        Ok(PagedAudit {
            requests,
            page,
            per_page,
            total,
            total_pages,
        })
    }

    pub async fn find_by_id(
        &self,
        id: i64,
    ) -> StorageResult<Option<entities::request_logs::Model>> {
        Ok(entities::RequestLogs::find_by_id(id).one(&self.db).await?)
    }

    /// Request counts bucketed per hour or per day, ordered by bucket label.
    pub async fn timeseries(
        &self,
        since: OffsetDateTime,
        bucket: TimeBucket,
    ) -> StorageResult<Vec<TimeSeriesPoint>> {
        use entities::request_logs::Column;

        let rows = entities::RequestLogs::find()
            .select_only()
            .column(Column::Timestamp)
            .filter(Column::Timestamp.gte(since))
            .into_model::<TimestampRow>()
            .all(&self.db)
            .await?;

        let mut buckets: BTreeMap<String, i64> = BTreeMap::new();
        for row in rows {
            *buckets.entry(bucket.label(row.timestamp)).or_default() += 1;
        }
        Ok(buckets
            .into_iter()
            .map(|(timestamp, count)| TimeSeriesPoint { timestamp, count })
            .collect())
    }
}
