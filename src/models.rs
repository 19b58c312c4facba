use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;

// --- Enumerations (stored as lowercase TEXT) ---

/// Role
///
/// The RBAC value attached to every profile. Fixed at signup; the application
/// never updates it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    Student,
    Faculty,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Faculty => "faculty",
            Role::Admin => "admin",
        }
    }

    /// Faculty and admins submit notices; students only read them.
    pub fn can_submit_notices(&self) -> bool {
        matches!(self, Role::Faculty | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "faculty" => Ok(Role::Faculty),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::Validation(format!("Unknown role '{}'.", other))),
        }
    }
}

/// NoticeStatus
///
/// A rejected notice is deleted, so there is no `Rejected` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum NoticeStatus {
    #[default]
    Pending,
    Approved,
}

impl NoticeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeStatus::Pending => "pending",
            NoticeStatus::Approved => "approved",
        }
    }
}

impl FromStr for NoticeStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NoticeStatus::Pending),
            "approved" => Ok(NoticeStatus::Approved),
            other => Err(AppError::Backend(format!("unknown notice status '{}'", other))),
        }
    }
}

/// Category
///
/// The fixed set of notice categories shown on the student home screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Category {
    Exam,
    Events,
    Fees,
    Holidays,
    #[default]
    General,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Exam,
        Category::Events,
        Category::Fees,
        Category::Holidays,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Exam => "exam",
            Category::Events => "events",
            Category::Fees => "fees",
            Category::Holidays => "holidays",
            Category::General => "general",
        }
    }
}

impl FromStr for Category {
    type Err = AppError;

    /// Case-insensitive on trimmed input, so "  Exam " is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Unknown category '{}'. Use one of: exam, events, fees, holidays, general.",
                    s.trim()
                ))
            })
    }
}

// --- Core Records ---

/// UserProfile
///
/// The profile document keyed by the identity provider's user id. Written once
/// at signup and read on every session classification.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct UserProfile {
    // Same UUID as the identity provider's user.
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Notice
///
/// A notice record from the `notices` table.
///
/// *Lifecycle*: `pending → approved` (visible to students) or `pending → deleted`
/// (rejection). Only the creator may edit, and only while pending.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct Notice {
    pub id: Uuid,
    pub title: String,
    // Older clients call this field "description".
    #[serde(alias = "description")]
    pub content: String,
    pub category: Category,
    pub created_by: Uuid,
    pub creator_role: Role,
    pub status: NoticeStatus,
    pub approved_by: Option<Uuid>,
    #[ts(type = "string | null")]
    pub approved_at: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl Notice {
    pub fn is_pending(&self) -> bool {
        self.status == NoticeStatus::Pending
    }

    /// Student-facing views show approved notices only.
    pub fn is_visible_to_students(&self) -> bool {
        self.status == NoticeStatus::Approved
    }

    /// Detail visibility: approved, or the caller wrote it, or the caller moderates.
    pub fn is_visible_to(&self, user_id: Uuid, role: Role) -> bool {
        self.is_visible_to_students() || self.created_by == user_id || role == Role::Admin
    }

    /// check_editable_by
    ///
    /// Owner-only and pending-only. Ownership is checked first so that a
    /// stranger learns nothing about the notice's status.
    pub fn check_editable_by(&self, user_id: Uuid) -> Result<(), AppError> {
        if self.created_by != user_id {
            return Err(AppError::Forbidden(
                "You do not have permission to edit this notice.".to_string(),
            ));
        }
        if !self.is_pending() {
            return Err(AppError::Forbidden(
                "Only pending notices can be edited.".to_string(),
            ));
        }
        Ok(())
    }
}

/// NoticeQuery
///
/// The three live queries the client subscribes to. Every query is ordered by
/// `created_at`, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeQuery {
    Approved,
    Pending,
    CreatedBy(Uuid),
}

impl NoticeQuery {
    pub fn matches(&self, notice: &Notice) -> bool {
        match self {
            NoticeQuery::Approved => notice.status == NoticeStatus::Approved,
            NoticeQuery::Pending => notice.status == NoticeStatus::Pending,
            NoticeQuery::CreatedBy(uid) => notice.created_by == *uid,
        }
    }
}

// --- Request Payloads (Input Schemas) ---

/// NoticeDraft
///
/// Input payload for submitting (POST /notices) and editing (PUT /notices/{id})
/// a notice. The category arrives as free text and is parsed by `validate`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct NoticeDraft {
    pub title: String,
    #[serde(alias = "description")]
    pub content: String,
    pub category: String,
}

/// NoticeFields
///
/// A draft that passed validation: trimmed, non-empty, known category.
#[derive(Debug, Clone, PartialEq)]
pub struct NoticeFields {
    pub title: String,
    pub content: String,
    pub category: Category,
}

impl NoticeDraft {
    pub fn validate(&self) -> Result<NoticeFields, AppError> {
        let title = self.title.trim();
        let content = self.content.trim();
        let category = self.category.trim();
        if title.is_empty() || content.is_empty() || category.is_empty() {
            return Err(AppError::Validation("All fields are required.".to_string()));
        }
        Ok(NoticeFields {
            title: title.to_string(),
            content: content.to_string(),
            category: category.parse()?,
        })
    }
}

/// SignupRequest
///
/// Input payload for POST /auth/signup. The password only travels to the
/// identity provider; it is never stored or logged here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub role: Role,
}

pub const MIN_PASSWORD_LEN: usize = 6;

impl SignupRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty()
            || self.email.trim().is_empty()
            || self.password.is_empty()
            || self.confirm_password.is_empty()
        {
            return Err(AppError::Validation("Please fill in all fields".to_string()));
        }
        if self.password != self.confirm_password {
            return Err(AppError::Validation("Passwords do not match".to_string()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ResendVerificationRequest {
    pub email: String,
}

// --- Response Schemas (Output) ---

/// LoginResponse
///
/// Returned by POST /auth/login. `navigate_to` is the dashboard path for the
/// profile's role, so the client can route without a second round trip.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub role: Role,
    pub email_verified: bool,
    pub navigate_to: String,
}

/// AdminDashboardStats
///
/// Output schema for GET /admin/stats.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct AdminDashboardStats {
    pub total_users: i64,
    pub pending_notices: i64,
    pub approved_notices: i64,
}

/// CategoryCount
///
/// One entry of GET /notices/categories.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct CategoryCount {
    pub category: Category,
    pub count: usize,
}

/// Counts approved notices per category. Every category is present, in display order.
pub fn count_by_category(notices: &[Notice]) -> Vec<CategoryCount> {
    Category::ALL
        .into_iter()
        .map(|category| CategoryCount {
            category,
            count: notices
                .iter()
                .filter(|n| n.is_visible_to_students() && n.category == category)
                .count(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserName {
    pub id: Uuid,
    pub name: String,
}
