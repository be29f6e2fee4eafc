use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "request_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub timestamp: OffsetDateTime,
    pub model: String,
    pub request_json: Json,
    pub response_json: Option<Json>,
    pub status_code: i32,
    pub success: bool,
    pub error: Option<String>,
    pub cost_input: f64,
    pub cost_output: f64,
    pub cost_total: f64,
    pub temperature: f64,
    pub key_source: String,
    pub cache_hit: bool,
    pub request_hash: String,
    pub duration_ms: i64,
    pub prompt_tokens: i32,
    pub output_tokens: i32,
    pub total_tokens: i32,
    pub is_vision: bool,
}

impl ActiveModelBehavior for ActiveModel {}
