// Repository layer for database operations
//
// Plain sqlx queries returning anyhow::Result. Trait adapters in the sibling
// modules convert rows into pulse-core types.

use anyhow::Result;
use chrono::{DateTime, Utc};
use pulse_core::aggregation::Aggregation;
use pulse_core::notification::CreateNotification;
use pulse_core::Event;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::*;

/// Rows per multi-row INSERT; keeps bind parameters well under the 65535 limit
const INSERT_CHUNK: usize = 1000;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the pipeline's own tables
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // ============================================
    // Analytics events
    // ============================================

    /// Insert events, skipping duplicate ids. Returns rows inserted.
    pub async fn insert_events(&self, events: &[Event]) -> Result<u64> {
        let mut inserted = 0;
        for chunk in events.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO analytics_events (event_id, user_id, user_role, event_type, entity_type, \
                 entity_id, metadata, ip_address, user_agent, session_id, created_at) ",
            );
            builder.push_values(chunk, |mut row, event| {
                row.push_bind(event.event_id)
                    .push_bind(event.user_id.as_deref())
                    .push_bind(event.user_role.map(|r| r.as_str()))
                    .push_bind(event.event_type.as_str())
                    .push_bind(event.entity_type.as_deref())
                    .push_bind(event.entity_id.as_deref())
                    .push_bind(&event.metadata)
                    .push_bind(event.ip_address.as_deref())
                    .push_bind(event.user_agent.as_deref())
                    .push_bind(event.session_id.as_deref())
                    .push_bind(event.created_at);
            });
            builder.push(" ON CONFLICT (event_id) DO NOTHING");

            let result = builder.build().execute(&self.pool).await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    pub async fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT event_id, user_id, user_role, event_type, entity_type, entity_id, metadata,
                   ip_address, user_agent, session_id, created_at
            FROM analytics_events
            WHERE created_at >= $1 AND created_at < $2
            ORDER BY created_at ASC, event_id ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn recent_events(&self, limit: i64) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT event_id, user_id, user_role, event_type, entity_type, entity_id, metadata,
                   ip_address, user_agent, session_id, created_at
            FROM analytics_events
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn count_distinct_users_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT user_id)
            FROM analytics_events
            WHERE created_at >= $1 AND user_id IS NOT NULL
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn count_events_by_type_since(
        &self,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM analytics_events
            WHERE event_type = $1 AND created_at >= $2
            "#,
        )
        .bind(event_type)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn top_event_types_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TypeCountRow>> {
        let rows = sqlx::query_as::<_, TypeCountRow>(
            r#"
            SELECT event_type, COUNT(*) AS count
            FROM analytics_events
            WHERE created_at >= $1
            GROUP BY event_type
            ORDER BY count DESC, event_type ASC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Newest events since `since`. With a user, only that user's events or
    /// events from `role`.
    pub async fn activity_feed(
        &self,
        user_id: Option<&str>,
        role: Option<&str>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT event_id, user_id, user_role, event_type, entity_type, entity_id, metadata,
                   ip_address, user_agent, session_id, created_at
            FROM analytics_events
            WHERE created_at >= $1
              AND ($2::text IS NULL
                   OR user_id = $2
                   OR ($3::text IS NOT NULL AND user_role = $3))
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(since)
        .bind(user_id)
        .bind(role)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Aggregations
    // ============================================

    pub async fn upsert_aggregation(&self, aggregation: &Aggregation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analytics_aggregations
                (aggregation_type, time_period, start_time, end_time, metrics, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (aggregation_type, time_period) DO UPDATE
            SET start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time,
                metrics = EXCLUDED.metrics,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(aggregation.aggregation_type.as_str())
        .bind(&aggregation.time_period)
        .bind(aggregation.start_time)
        .bind(aggregation.end_time)
        .bind(serde_json::to_value(&aggregation.metrics)?)
        .bind(aggregation.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_aggregation(
        &self,
        aggregation_type: &str,
        time_period: &str,
    ) -> Result<Option<AggregationRow>> {
        let row = sqlx::query_as::<_, AggregationRow>(
            r#"
            SELECT aggregation_type, time_period, start_time, end_time, metrics, updated_at
            FROM analytics_aggregations
            WHERE aggregation_type = $1 AND time_period = $2
            "#,
        )
        .bind(aggregation_type)
        .bind(time_period)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Notifications
    // ============================================

    pub async fn create_notification(&self, input: &CreateNotification) -> Result<NotificationRow> {
        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            INSERT INTO notifications (id, user_id, type, title, message, data, is_read, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, NOW(), NOW())
            RETURNING id, user_id, type, title, message, data, is_read, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.user_id)
        .bind(input.kind.as_str())
        .bind(&input.title)
        .bind(&input.message)
        .bind(&input.data)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// One multi-row insert per chunk, all inside a single transaction
    pub async fn create_notifications(&self, inputs: &[CreateNotification]) -> Result<Vec<NotificationRow>> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(inputs.len());

        for chunk in inputs.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO notifications (id, user_id, type, title, message, data, is_read, created_at, updated_at) ",
            );
            builder.push_values(chunk, |mut row, input| {
                row.push_bind(Uuid::now_v7())
                    .push_bind(input.user_id.as_str())
                    .push_bind(input.kind.as_str())
                    .push_bind(input.title.as_str())
                    .push_bind(input.message.as_str())
                    .push_bind(input.data.as_ref())
                    .push("FALSE")
                    .push("NOW()")
                    .push("NOW()");
            });
            builder.push(
                " RETURNING id, user_id, type, title, message, data, is_read, created_at, updated_at",
            );

            let rows = builder
                .build_query_as::<NotificationRow>()
                .fetch_all(&mut *tx)
                .await?;
            created.extend(rows);
        }

        tx.commit().await?;
        Ok(created)
    }

    /// Returns true if an unread notification owned by `user_id` was marked read
    pub async fn mark_notification_read(&self, id: Uuid, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = TRUE, updated_at = NOW()
            WHERE id = $1 AND user_id = $2 AND is_read = FALSE
            "#,
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_notifications_read_by_type(&self, user_id: &str, kind: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = TRUE, updated_at = NOW()
            WHERE user_id = $1 AND type = $2 AND is_read = FALSE
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn count_unread_notifications(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn notification_read_counts(&self, user_id: &str) -> Result<Vec<ReadCountRow>> {
        let rows = sqlx::query_as::<_, ReadCountRow>(
            r#"
            SELECT type, is_read, COUNT(*) AS count
            FROM notifications
            WHERE user_id = $1
            GROUP BY type, is_read
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Job board (read-only, owned by the host application)
    // ============================================

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT first_name, last_name, bio, skills, experience, education,
                   profile_picture, location, phone
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn count_applications(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM applications WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_bookmarks(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_bookmarks WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_searches(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_history WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn recent_applications(&self, user_id: &str, limit: i64) -> Result<Vec<ApplicationRow>> {
        let rows = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT a.id, j.title AS job_title, j.company, a.status, a.applied_at
            FROM applications a
            JOIN jobs j ON j.id = a.job_id
            WHERE a.user_id = $1
            ORDER BY a.applied_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn recent_bookmarks(&self, user_id: &str, limit: i64) -> Result<Vec<BookmarkRow>> {
        let rows = sqlx::query_as::<_, BookmarkRow>(
            r#"
            SELECT b.id, j.title AS job_title, j.company, b.created_at
            FROM job_bookmarks b
            JOIN jobs j ON j.id = b.job_id
            WHERE b.user_id = $1
            ORDER BY b.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn employer_postings(&self, user_id: &str) -> Result<Vec<PostingRow>> {
        let rows = sqlx::query_as::<_, PostingRow>(
            r#"
            SELECT id, title, is_active,
                   COALESCE(views, 0)::bigint AS views,
                   COALESCE(applications_count, 0)::bigint AS applications_count
            FROM jobs
            WHERE created_by = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn employer_application_statuses(&self, user_id: &str) -> Result<Vec<StatusRow>> {
        let rows = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT a.status, a.applied_at
            FROM applications a
            JOIN jobs j ON j.id = a.job_id
            WHERE j.created_by = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn employer_recent_applications(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ReceivedApplicationRow>> {
        let rows = sqlx::query_as::<_, ReceivedApplicationRow>(
            r#"
            SELECT a.id, j.title AS job_title, u.first_name, u.last_name, a.status, a.applied_at
            FROM applications a
            JOIN jobs j ON j.id = a.job_id
            LEFT JOIN users u ON u.id = a.user_id
            WHERE j.created_by = $1
            ORDER BY a.applied_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn platform_counts(&self) -> Result<PlatformCountsRow> {
        let row = sqlx::query_as::<_, PlatformCountsRow>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users) AS total_users,
                (SELECT COUNT(*) FROM users WHERE is_active) AS active_users,
                (SELECT COUNT(*) FROM jobs) AS total_jobs,
                (SELECT COUNT(*) FROM jobs WHERE is_active) AS active_jobs,
                (SELECT COUNT(*) FROM applications) AS total_applications
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn top_sectors(&self, limit: i64) -> Result<Vec<SectorRow>> {
        let rows = sqlx::query_as::<_, SectorRow>(
            r#"
            SELECT sector, COUNT(*) AS count
            FROM jobs
            WHERE sector IS NOT NULL
            GROUP BY sector
            ORDER BY count DESC, sector ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn users_with_role(&self, role: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM users WHERE role = $1 AND is_active ORDER BY id",
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn company_members(&self, company_id: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT cm.user_id
            FROM company_members cm
            JOIN users u ON u.id = cm.user_id
            WHERE cm.company_id = $1 AND u.role = 'employer'
            ORDER BY cm.user_id
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn companies_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT company_id FROM company_members WHERE user_id = $1 ORDER BY company_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    // ============================================
    // Sessions
    // ============================================

    /// Identity behind a live session, looked up by the SHA-256 of its id
    pub async fn session_identity(&self, token_hash: &str) -> Result<Option<SessionIdentityRow>> {
        let row = sqlx::query_as::<_, SessionIdentityRow>(
            r#"
            SELECT u.id AS user_id, u.role, u.first_name, u.last_name, u.email
            FROM auth_sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = $1 AND s.expires_at > NOW() AND u.is_active
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
