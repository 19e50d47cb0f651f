use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another jobfeeder process appears to hold the database. Please wait and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

/// Reasons an operator-supplied feed definition is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedValidationError {
    #[error("at least one of keyword or location is required")]
    MissingSearchTerms,

    #[error("result limit must be between 1 and {max}, got {0}", max = MAX_FEED_LIMIT)]
    LimitOutOfRange(u32),

    #[error("page number must be at least 1")]
    InvalidPage,

    #[error("unknown frequency '{0}' (expected 1h, 6h, 12h or 24h)")]
    UnknownFrequency(String),

    #[error("unknown feed status '{0}' (expected active or inactive)")]
    UnknownStatus(String),

    #[error("unknown post status '{0}' (expected publish, draft or pending)")]
    UnknownPostStatus(String),
}

// ============================================================================
// Timestamps
// ============================================================================

/// Timestamps are stored as unix seconds.
pub(crate) fn from_unix(ts: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_default()
}

// ============================================================================
// Feed
// ============================================================================

/// Upper bound on results requested per upstream call.
pub const MAX_FEED_LIMIT: u32 = 100;

/// How often a feed should be imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Frequency {
    #[serde(rename = "1h")]
    Hourly,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "24h")]
    Daily,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Hourly => "1h",
            Frequency::SixHours => "6h",
            Frequency::TwelveHours => "12h",
            Frequency::Daily => "24h",
        }
    }

    /// Offset between a run and the next one.
    pub fn offset(self) -> Duration {
        match self {
            Frequency::Hourly => Duration::hours(1),
            Frequency::SixHours => Duration::hours(6),
            Frequency::TwelveHours => Duration::hours(12),
            Frequency::Daily => Duration::hours(24),
        }
    }

    /// Parse a stored frequency, treating anything unrecognized as daily.
    pub fn parse_lossy(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            tracing::warn!(frequency = %value, "Unrecognized feed frequency, defaulting to 24h");
            Frequency::Daily
        })
    }
}

impl FromStr for Frequency {
    type Err = FeedValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1h" => Ok(Frequency::Hourly),
            "6h" => Ok(Frequency::SixHours),
            "12h" => Ok(Frequency::TwelveHours),
            "24h" => Ok(Frequency::Daily),
            other => Err(FeedValidationError::UnknownFrequency(other.to_string())),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Active,
    Inactive,
}

impl FeedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedStatus::Active => "active",
            FeedStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for FeedStatus {
    type Err = FeedValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "active" => Ok(FeedStatus::Active),
            "inactive" => Ok(FeedStatus::Inactive),
            other => Err(FeedValidationError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operator-defined recurring search against the upstream API.
#[derive(Debug, Clone, Serialize)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub source: String,
    pub keyword: String,
    pub location: String,
    pub limit: u32,
    pub page: u32,
    /// Owner of the content records this feed creates
    pub author_id: i64,
    /// `job_listing_category` term, empty when unset
    pub category: String,
    /// `job_listing_type` term, empty when unset
    pub job_type: String,
    pub frequency: Frequency,
    pub status: FeedStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    /// Active and either never scheduled or scheduled at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == FeedStatus::Active && self.next_run.map_or(true, |next| next <= now)
    }
}

/// Internal row type for feed queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub name: String,
    pub source: String,
    pub keyword: String,
    pub location: String,
    pub limit_jobs: i64,
    pub page_number: i64,
    pub author_id: i64,
    pub job_category: String,
    pub job_type: String,
    pub frequency: String,
    pub status: String,
    pub last_run: Option<i64>,
    pub next_run: Option<i64>,
    pub created_at: i64,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Feed {
        let status = self.status.parse().unwrap_or_else(|_| {
            tracing::warn!(feed_id = self.id, status = %self.status, "Unknown feed status, treating as inactive");
            FeedStatus::Inactive
        });

        Feed {
            id: self.id,
            name: self.name,
            source: self.source,
            keyword: self.keyword,
            location: self.location,
            limit: self.limit_jobs.clamp(1, MAX_FEED_LIMIT as i64) as u32,
            page: self.page_number.max(1) as u32,
            author_id: self.author_id,
            category: self.job_category,
            job_type: self.job_type,
            frequency: Frequency::parse_lossy(&self.frequency),
            status,
            last_run: self.last_run.map(from_unix),
            next_run: self.next_run.map(from_unix),
            created_at: from_unix(self.created_at),
        }
    }
}

/// Operator input for creating or editing a feed.
#[derive(Debug, Clone)]
pub struct NewFeed {
    /// Display name; derived from keyword and location when `None`
    pub name: Option<String>,
    pub keyword: String,
    pub location: String,
    pub limit: u32,
    pub page: u32,
    pub author_id: i64,
    pub category: String,
    pub job_type: String,
    pub frequency: Frequency,
    pub status: FeedStatus,
}

impl Default for NewFeed {
    fn default() -> Self {
        Self {
            name: None,
            keyword: String::new(),
            location: String::new(),
            limit: 10,
            page: 1,
            author_id: 1,
            category: String::new(),
            job_type: String::new(),
            frequency: Frequency::Daily,
            status: FeedStatus::Active,
        }
    }
}

impl NewFeed {
    /// Editable copy of a stored feed. A name that matches the one derived from
    /// the search terms is dropped so that it follows later term changes.
    pub fn from_feed(feed: &Feed) -> Self {
        let mut editable = Self {
            name: None,
            keyword: feed.keyword.clone(),
            location: feed.location.clone(),
            limit: feed.limit,
            page: feed.page,
            author_id: feed.author_id,
            category: feed.category.clone(),
            job_type: feed.job_type.clone(),
            frequency: feed.frequency,
            status: feed.status,
        };
        if feed.name != editable.display_name() {
            editable.name = Some(feed.name.clone());
        }
        editable
    }

    pub fn validate(&self) -> Result<(), FeedValidationError> {
        if self.keyword.trim().is_empty() && self.location.trim().is_empty() {
            return Err(FeedValidationError::MissingSearchTerms);
        }
        if self.limit == 0 || self.limit > MAX_FEED_LIMIT {
            return Err(FeedValidationError::LimitOutOfRange(self.limit));
        }
        if self.page == 0 {
            return Err(FeedValidationError::InvalidPage);
        }
        Ok(())
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => [self.keyword.trim(), self.location.trim()]
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" - "),
        }
    }
}

// ============================================================================
// Content Records
// ============================================================================

/// Publication state given to newly imported records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Publish,
    Draft,
    Pending,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Publish => "publish",
            PostStatus::Draft => "draft",
            PostStatus::Pending => "pending",
        }
    }
}

impl FromStr for PostStatus {
    type Err = FeedValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "publish" => Ok(PostStatus::Publish),
            "draft" => Ok(PostStatus::Draft),
            "pending" => Ok(PostStatus::Pending),
            other => Err(FeedValidationError::UnknownPostStatus(other.to_string())),
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post type given to every imported job.
pub const JOB_LISTING_POST_TYPE: &str = "job_listing";

/// Fields for a content record about to be created.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub title: String,
    pub body: String,
    pub status: PostStatus,
    pub post_type: String,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A content record as held by the content store.
#[derive(Debug, Clone)]
pub struct ContentRecord {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub status: String,
    pub post_type: String,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ContentDbRow {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub status: String,
    pub post_type: String,
    pub author_id: i64,
    pub created_at: i64,
}

impl ContentDbRow {
    pub(crate) fn into_record(self) -> ContentRecord {
        ContentRecord {
            id: self.id,
            title: self.title,
            body: self.body,
            status: self.status,
            post_type: self.post_type,
            author_id: self.author_id,
            created_at: from_unix(self.created_at),
        }
    }
}
