use crate::{
    error::AppError,
    models::{AdminDashboardStats, Category, Notice, NoticeFields, NoticeQuery, NoticeStatus, Role, UserProfile},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::{FromRow, PgPool, query_builder::QueryBuilder};
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

/// Repository Trait
///
/// The abstract contract for the profile and notice store. Handlers and the
/// session router only ever see this trait, so the Postgres implementation and
/// the in-memory one are interchangeable.
///
/// Store failures are returned to the caller. The session router treats a
/// failed profile lookup the same as a missing profile.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Profiles ---
    // Inserts once; a second insert for the same id is a Conflict.
    async fn create_profile(&self, profile: UserProfile) -> Result<UserProfile, AppError>;
    async fn get_profile(&self, id: Uuid) -> Result<Option<UserProfile>, AppError>;

    // --- Notices ---
    // New notices always start pending.
    async fn create_notice(
        &self,
        fields: NoticeFields,
        created_by: Uuid,
        creator_role: Role,
    ) -> Result<Notice, AppError>;
    async fn get_notice(&self, id: Uuid) -> Result<Option<Notice>, AppError>;
    // Newest first.
    async fn list_notices(&self, query: NoticeQuery) -> Result<Vec<Notice>, AppError>;

    /// Owner-only, pending-only. Returns None when no row matched all three conditions.
    async fn update_pending_notice(
        &self,
        id: Uuid,
        created_by: Uuid,
        fields: NoticeFields,
    ) -> Result<Option<Notice>, AppError>;

    /// Moves a pending notice to approved. None if it was not pending (or absent).
    async fn approve_notice(
        &self,
        id: Uuid,
        approved_by: Uuid,
        approved_at: DateTime<Utc>,
    ) -> Result<Option<Notice>, AppError>;

    /// Rejection: hard delete of a pending notice. True if a row was removed.
    async fn delete_pending_notice(&self, id: Uuid) -> Result<bool, AppError>;

    async fn get_stats(&self) -> Result<AdminDashboardStats, AppError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

// --- Row Mapping ---

#[derive(FromRow)]
struct ProfileRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for UserProfile {
    type Error = AppError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse()
            .map_err(|_| AppError::Backend(format!("profile {} has unknown role '{}'", row.id, row.role)))?;
        Ok(UserProfile {
            id: row.id,
            name: row.name,
            email: row.email,
            role,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct NoticeRow {
    id: Uuid,
    title: String,
    content: String,
    category: Option<String>,
    created_by: Uuid,
    creator_role: String,
    status: String,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<NoticeRow> for Notice {
    type Error = AppError;

    fn try_from(row: NoticeRow) -> Result<Self, Self::Error> {
        // Rows written before categories were enforced read as "general".
        let category = row
            .category
            .as_deref()
            .and_then(|c| c.parse::<Category>().ok())
            .unwrap_or_default();
        let creator_role = row.creator_role.parse().map_err(|_| {
            AppError::Backend(format!("notice {} has unknown creator role '{}'", row.id, row.creator_role))
        })?;
        Ok(Notice {
            id: row.id,
            title: row.title,
            content: row.content,
            category,
            created_by: row.created_by,
            creator_role,
            status: row.status.parse()?,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            created_at: row.created_at,
        })
    }
}

fn into_notices(rows: Vec<NoticeRow>) -> Result<Vec<Notice>, AppError> {
    rows.into_iter().map(Notice::try_from).collect()
}

const NOTICE_COLUMNS: &str = "id, title, content, category, created_by, creator_role, status, approved_by, approved_at, created_at";

/// PostgresRepository
///
/// The `Repository` implementation backed by PostgreSQL (`migrations/`).
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// create_profile
    ///
    /// `ON CONFLICT DO NOTHING` plus `RETURNING` turns a duplicate signup into
    /// an empty result instead of a database error.
    async fn create_profile(&self, profile: UserProfile) -> Result<UserProfile, AppError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"INSERT INTO profiles (id, name, email, role, created_at)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (id) DO NOTHING
               RETURNING id, name, email, role, created_at"#,
        )
        .bind(profile.id)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(profile.role.as_str())
        .bind(profile.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(AppError::Conflict("A profile already exists for this account.".to_string())),
        }
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<UserProfile>, AppError> {
        sqlx::query_as::<_, ProfileRow>(
            "SELECT id, name, email, role, created_at FROM profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(UserProfile::try_from)
        .transpose()
    }

    async fn create_notice(
        &self,
        fields: NoticeFields,
        created_by: Uuid,
        creator_role: Role,
    ) -> Result<Notice, AppError> {
        let query = format!(
            "INSERT INTO notices (id, title, content, category, created_by, creator_role, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', NOW()) RETURNING {}",
            NOTICE_COLUMNS
        );
        sqlx::query_as::<_, NoticeRow>(&query)
            .bind(Uuid::new_v4())
            .bind(&fields.title)
            .bind(&fields.content)
            .bind(fields.category.as_str())
            .bind(created_by)
            .bind(creator_role.as_str())
            .fetch_one(&self.pool)
            .await?
            .try_into()
    }

    async fn get_notice(&self, id: Uuid) -> Result<Option<Notice>, AppError> {
        let query = format!("SELECT {} FROM notices WHERE id = $1", NOTICE_COLUMNS);
        sqlx::query_as::<_, NoticeRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Notice::try_from)
            .transpose()
    }

    /// list_notices
    ///
    /// One builder for the three live queries; every filter value is bound.
    async fn list_notices(&self, query: NoticeQuery) -> Result<Vec<Notice>, AppError> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM notices WHERE ", NOTICE_COLUMNS));

        match query {
            NoticeQuery::Approved => {
                builder.push("status = ").push_bind(NoticeStatus::Approved.as_str());
            }
            NoticeQuery::Pending => {
                builder.push("status = ").push_bind(NoticeStatus::Pending.as_str());
            }
            NoticeQuery::CreatedBy(uid) => {
                builder.push("created_by = ").push_bind(uid);
            }
        }
        builder.push(" ORDER BY created_at DESC");

        let rows = builder
            .build_query_as::<NoticeRow>()
            .fetch_all(&self.pool)
            .await?;
        into_notices(rows)
    }

    async fn update_pending_notice(
        &self,
        id: Uuid,
        created_by: Uuid,
        fields: NoticeFields,
    ) -> Result<Option<Notice>, AppError> {
        let query = format!(
            "UPDATE notices SET title = $3, content = $4, category = $5 \
             WHERE id = $1 AND created_by = $2 AND status = 'pending' RETURNING {}",
            NOTICE_COLUMNS
        );
        sqlx::query_as::<_, NoticeRow>(&query)
            .bind(id)
            .bind(created_by)
            .bind(&fields.title)
            .bind(&fields.content)
            .bind(fields.category.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Notice::try_from)
            .transpose()
    }

    async fn approve_notice(
        &self,
        id: Uuid,
        approved_by: Uuid,
        approved_at: DateTime<Utc>,
    ) -> Result<Option<Notice>, AppError> {
        let query = format!(
            "UPDATE notices SET status = 'approved', approved_by = $2, approved_at = $3 \
             WHERE id = $1 AND status = 'pending' RETURNING {}",
            NOTICE_COLUMNS
        );
        sqlx::query_as::<_, NoticeRow>(&query)
            .bind(id)
            .bind(approved_by)
            .bind(approved_at)
            .fetch_optional(&self.pool)
            .await?
            .map(Notice::try_from)
            .transpose()
    }

    async fn delete_pending_notice(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM notices WHERE id = $1 AND status = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// get_stats
    ///
    /// All dashboard counters in a single round trip.
    async fn get_stats(&self) -> Result<AdminDashboardStats, AppError> {
        let (total_users, pending_notices, approved_notices): (i64, i64, i64) = sqlx::query_as(
            r#"SELECT
                   (SELECT COUNT(*) FROM profiles),
                   (SELECT COUNT(*) FROM notices WHERE status = 'pending'),
                   (SELECT COUNT(*) FROM notices WHERE status = 'approved')"#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(AdminDashboardStats {
            total_users,
            pending_notices,
            approved_notices,
        })
    }
}

/// InMemoryRepository
///
/// A `Repository` held entirely in process memory. Used by the test suites and
/// handy for running the API without a database. Insertion order breaks ties
/// between notices created within the same clock tick.
#[derive(Default)]
pub struct InMemoryRepository {
    /// When true, every call fails as if the store were unreachable.
    pub should_fail: bool,
    store: RwLock<MemoryStore>,
}

#[derive(Default)]
struct MemoryStore {
    profiles: HashMap<Uuid, UserProfile>,
    notices: HashMap<Uuid, (u64, Notice)>,
    next_seq: u64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    fn check_available(&self) -> Result<(), AppError> {
        if self.should_fail {
            return Err(AppError::Backend("in-memory store unavailable (simulated)".to_string()));
        }
        Ok(())
    }

    fn sorted(mut notices: Vec<(u64, Notice)>) -> Vec<Notice> {
        notices.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        notices.into_iter().map(|(_, n)| n).collect()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_profile(&self, profile: UserProfile) -> Result<UserProfile, AppError> {
        self.check_available()?;
        let mut store = self.store.write();
        if store.profiles.contains_key(&profile.id) {
            return Err(AppError::Conflict("A profile already exists for this account.".to_string()));
        }
        store.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<UserProfile>, AppError> {
        self.check_available()?;
        Ok(self.store.read().profiles.get(&id).cloned())
    }

    async fn create_notice(
        &self,
        fields: NoticeFields,
        created_by: Uuid,
        creator_role: Role,
    ) -> Result<Notice, AppError> {
        self.check_available()?;
        let notice = Notice {
            id: Uuid::new_v4(),
            title: fields.title,
            content: fields.content,
            category: fields.category,
            created_by,
            creator_role,
            status: NoticeStatus::Pending,
            approved_by: None,
            approved_at: None,
            created_at: Utc::now(),
        };
        let mut store = self.store.write();
        let seq = store.next_seq;
        store.next_seq += 1;
        store.notices.insert(notice.id, (seq, notice.clone()));
        Ok(notice)
    }

    async fn get_notice(&self, id: Uuid) -> Result<Option<Notice>, AppError> {
        self.check_available()?;
        Ok(self.store.read().notices.get(&id).map(|(_, n)| n.clone()))
    }

    async fn list_notices(&self, query: NoticeQuery) -> Result<Vec<Notice>, AppError> {
        self.check_available()?;
        let matching = self
            .store
            .read()
            .notices
            .values()
            .filter(|entry| query.matches(&entry.1))
            .cloned()
            .collect();
        Ok(Self::sorted(matching))
    }

    async fn update_pending_notice(
        &self,
        id: Uuid,
        created_by: Uuid,
        fields: NoticeFields,
    ) -> Result<Option<Notice>, AppError> {
        self.check_available()?;
        let mut store = self.store.write();
        let Some((_, notice)) = store
            .notices
            .get_mut(&id)
            .filter(|entry| entry.1.created_by == created_by && entry.1.is_pending())
        else {
            return Ok(None);
        };
        notice.title = fields.title;
        notice.content = fields.content;
        notice.category = fields.category;
        Ok(Some(notice.clone()))
    }

    async fn approve_notice(
        &self,
        id: Uuid,
        approved_by: Uuid,
        approved_at: DateTime<Utc>,
    ) -> Result<Option<Notice>, AppError> {
        self.check_available()?;
        let mut store = self.store.write();
        let Some((_, notice)) = store.notices.get_mut(&id).filter(|entry| entry.1.is_pending()) else {
            return Ok(None);
        };
        notice.status = NoticeStatus::Approved;
        notice.approved_by = Some(approved_by);
        notice.approved_at = Some(approved_at);
        Ok(Some(notice.clone()))
    }

    async fn delete_pending_notice(&self, id: Uuid) -> Result<bool, AppError> {
        self.check_available()?;
        let mut store = self.store.write();
        let is_pending = store
            .notices
            .get(&id)
            .is_some_and(|(_, n)| n.is_pending());
        if is_pending {
            store.notices.remove(&id);
        }
        Ok(is_pending)
    }

    async fn get_stats(&self) -> Result<AdminDashboardStats, AppError> {
        self.check_available()?;
        let store = self.store.read();
        let count = |status: NoticeStatus| {
            store.notices.values().filter(|(_, n)| n.status == status).count() as i64
        };
        Ok(AdminDashboardStats {
            total_users: store.profiles.len() as i64,
            pending_notices: count(NoticeStatus::Pending),
            approved_notices: count(NoticeStatus::Approved),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(title: &str) -> NoticeFields {
        NoticeFields {
            title: title.to_string(),
            content: "body".to_string(),
            category: Category::General,
        }
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let repo = InMemoryRepository::new();
        let author = Uuid::new_v4();
        let first = repo.create_notice(fields("first"), author, Role::Faculty).await.unwrap();
        let second = repo.create_notice(fields("second"), author, Role::Faculty).await.unwrap();

        let mine = repo.list_notices(NoticeQuery::CreatedBy(author)).await.unwrap();
        assert_eq!(
            mine.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
    }

    #[tokio::test]
    async fn approved_notice_cannot_be_deleted_as_rejection() {
        let repo = InMemoryRepository::new();
        let notice = repo
            .create_notice(fields("t"), Uuid::new_v4(), Role::Faculty)
            .await
            .unwrap();
        repo.approve_notice(notice.id, Uuid::new_v4(), Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert!(!repo.delete_pending_notice(notice.id).await.unwrap());
        assert!(repo.get_notice(notice.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failing_store_reports_backend_error() {
        let repo = InMemoryRepository::new_failing();
        let err = repo.get_profile(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::Backend(_)));
    }
}
