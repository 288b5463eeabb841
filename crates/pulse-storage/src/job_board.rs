// Read-only job-board queries and recipient lookup
//
// Expected host tables (all ids are TEXT):
//   users(id, role, first_name, last_name, email, bio, skills, experience, education,
//         profile_picture, location, phone, is_active)
//   jobs(id, title, company, sector, created_by, is_active, views, applications_count)
//   applications(id, user_id, job_id, status, applied_at)
//   job_bookmarks(id, user_id, job_id, created_at)
//   search_history(id, user_id, ...)
//   company_members(company_id, user_id)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::dashboard::{
    ApplicationRecord, BookmarkRecord, PlatformCounts, PostingRecord, ProfileSnapshot,
    ReceivedApplicationRecord, SectorCount,
};
use pulse_core::traits::{JobBoardReader, RecipientDirectory};
use pulse_core::{PulseError, Result, UserRole};

use crate::models::non_negative;
use crate::repositories::Database;

fn limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn store_err(e: anyhow::Error) -> PulseError {
    PulseError::store(e.to_string())
}

#[derive(Clone)]
pub struct DbJobBoard {
    db: Database,
}

impl DbJobBoard {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobBoardReader for DbJobBoard {
    async fn profile(&self, user_id: &str) -> Result<Option<ProfileSnapshot>> {
        let row = self.db.get_profile(user_id).await.map_err(store_err)?;
        Ok(row.map(ProfileSnapshot::from))
    }

    async fn count_applications(&self, user_id: &str) -> Result<u64> {
        self.db.count_applications(user_id).await.map(non_negative).map_err(store_err)
    }

    async fn count_bookmarks(&self, user_id: &str) -> Result<u64> {
        self.db.count_bookmarks(user_id).await.map(non_negative).map_err(store_err)
    }

    async fn count_searches(&self, user_id: &str) -> Result<u64> {
        self.db.count_searches(user_id).await.map(non_negative).map_err(store_err)
    }

    async fn recent_applications(&self, user_id: &str, n: usize) -> Result<Vec<ApplicationRecord>> {
        let rows = self.db.recent_applications(user_id, limit(n)).await.map_err(store_err)?;
        Ok(rows.into_iter().map(ApplicationRecord::from).collect())
    }

    async fn recent_bookmarks(&self, user_id: &str, n: usize) -> Result<Vec<BookmarkRecord>> {
        let rows = self.db.recent_bookmarks(user_id, limit(n)).await.map_err(store_err)?;
        Ok(rows.into_iter().map(BookmarkRecord::from).collect())
    }

    async fn employer_postings(&self, user_id: &str) -> Result<Vec<PostingRecord>> {
        let rows = self.db.employer_postings(user_id).await.map_err(store_err)?;
        Ok(rows.into_iter().map(PostingRecord::from).collect())
    }

    async fn employer_applications(&self, user_id: &str) -> Result<Vec<(String, DateTime<Utc>)>> {
        let rows = self
            .db
            .employer_application_statuses(user_id)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(|r| (r.status, r.applied_at)).collect())
    }

    async fn employer_recent_applications(
        &self,
        user_id: &str,
        n: usize,
    ) -> Result<Vec<ReceivedApplicationRecord>> {
        let rows = self
            .db
            .employer_recent_applications(user_id, limit(n))
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(ReceivedApplicationRecord::from).collect())
    }

    async fn platform_counts(&self) -> Result<PlatformCounts> {
        let row = self.db.platform_counts().await.map_err(store_err)?;
        Ok(PlatformCounts {
            total_users: non_negative(row.total_users),
            active_users: non_negative(row.active_users),
            total_jobs: non_negative(row.total_jobs),
            active_jobs: non_negative(row.active_jobs),
            total_applications: non_negative(row.total_applications),
        })
    }

    async fn top_sectors(&self, n: usize) -> Result<Vec<SectorCount>> {
        let rows = self.db.top_sectors(limit(n)).await.map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|r| SectorCount {
                sector: r.sector,
                count: non_negative(r.count),
            })
            .collect())
    }
}

#[async_trait]
impl RecipientDirectory for DbJobBoard {
    async fn users_with_role(&self, role: UserRole) -> Result<Vec<String>> {
        self.db.users_with_role(role.as_str()).await.map_err(store_err)
    }

    async fn company_members(&self, company_id: &str) -> Result<Vec<String>> {
        self.db.company_members(company_id).await.map_err(store_err)
    }

    async fn companies_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.db.companies_for_user(user_id).await.map_err(store_err)
    }
}
