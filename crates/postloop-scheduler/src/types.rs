use chrono::{DateTime, Utc};
use postloop_core::UserId;
use serde::{Deserialize, Serialize};

/// Ordering policy used to pick the next post from a schedule's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Random,
    NewestFirst,
    OldestFirst,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::Random => "random",
            Strategy::NewestFirst => "newest_first",
            Strategy::OldestFirst => "oldest_first",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Strategy::Random),
            "newest_first" => Ok(Strategy::NewestFirst),
            "oldest_first" => Ok(Strategy::OldestFirst),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// Which posts a schedule draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Every post owned by the user that has a deliverable asset.
    All,
    /// Only the posts explicitly attached to the schedule.
    Selected,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Scope::All => "all",
            Scope::Selected => "selected",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Scope::All),
            "selected" => Ok(Scope::Selected),
            other => Err(format!("unknown scope: {other}")),
        }
    }
}

/// Lifecycle state of a dispatch entry.
///
/// PENDING moves to exactly one of POSTED, FAILED or CANCELED. The only
/// transition out of a terminal state is FAILED → POSTED through a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Posted,
    Failed,
    Canceled,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Posted => "posted",
            EntryStatus::Failed => "failed",
            EntryStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "posted" => Ok(EntryStatus::Posted),
            "failed" => Ok(EntryStatus::Failed),
            "canceled" => Ok(EntryStatus::Canceled),
            other => Err(format!("unknown entry status: {other}")),
        }
    }
}

/// A persisted recurring publishing schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// UUID v4 string — primary key.
    pub id: String,
    pub user_id: UserId,
    /// Human-readable label.
    pub name: String,
    pub strategy: Strategy,
    pub scope: Scope,
    /// Recurrence rule, see [`crate::recurrence::Recurrence`].
    pub rule: String,
    /// IANA timezone the rule's hour/minute/weekday are evaluated in.
    pub timezone: String,
    /// Next due instant; `None` means the schedule is idle.
    pub next_run: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Start a new cycle automatically once every post has been published.
    pub auto_reset: bool,
    /// Number of completed cycles. Only ever increases.
    pub reset_count: u32,
    pub last_reset_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub user_id: UserId,
    pub name: String,
    pub strategy: Strategy,
    pub scope: Scope,
    pub rule: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub auto_reset: bool,
    /// Initial curated pool, used when `scope` is [`Scope::Selected`].
    #[serde(default)]
    pub selected_post_ids: Vec<String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// One concrete, time-stamped attempt to publish a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchEntry {
    pub id: String,
    /// `None` for ad hoc entries ("post now", "schedule once").
    pub schedule_id: Option<String>,
    pub post_id: String,
    pub user_id: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub status: EntryStatus,
    pub posted_at: Option<DateTime<Utc>>,
    /// Aggregate of per-provider failures, `"<provider>: <reason>; …"`.
    pub error_message: Option<String>,
    /// Number of dispatch attempts made so far.
    pub attempts: u32,
    /// When the entry first became FAILED; anchors the retry window.
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DispatchEntry {
    /// A fresh PENDING entry.
    pub fn pending(
        schedule_id: Option<String>,
        post_id: &str,
        user_id: &UserId,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            schedule_id,
            post_id: post_id.to_string(),
            user_id: user_id.clone(),
            scheduled_at,
            status: EntryStatus::Pending,
            posted_at: None,
            error_message: None,
            attempts: 0,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Cycle progress of one schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStats {
    pub schedule_id: String,
    pub total: usize,
    /// Pool posts published since the last reset.
    pub posted: usize,
    pub remaining: usize,
    /// 0.0 – 100.0; zero for an empty pool.
    pub percent_complete: f64,
    pub reset_count: u32,
    pub last_reset_at: Option<DateTime<Utc>>,
    pub auto_reset: bool,
    pub cycle_complete: bool,
}

/// Aggregate counts from one `run` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub generated: usize,
    pub dispatched: usize,
    pub retried: usize,
}
