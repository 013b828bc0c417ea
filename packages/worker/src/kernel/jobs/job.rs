//! Job model: one unit of scheduled enrichment work, 1:1 with an item.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::id::db_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
}

pub(crate) const JOB_COLUMNS: &str = "id, item_id, origin_url, title, source_id, \
     target_language, voice, status, attempts, error_message, created_at, updated_at";

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = db_id())]
    pub id: Uuid,

    /// The item this job enriches; unique, so re-enqueueing dedups here.
    pub item_id: String,
    pub origin_url: String,
    pub title: String,
    #[builder(default, setter(strip_option))]
    pub source_id: Option<String>,

    // Pipeline payload
    #[builder(default = "fr".to_string())]
    pub target_language: String,
    #[builder(default, setter(strip_option))]
    pub voice: Option<String>,

    // State
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default = 0)]
    pub attempts: i32,
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(job)
    }

    pub async fn find_by_item(item_id: &str, db: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE item_id = $1"
        ))
        .bind(item_id)
        .fetch_optional(db)
        .await?;
        Ok(job)
    }
}
