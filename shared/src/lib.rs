use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Envelope ──

/// Every API response body: `{success, message?, data?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, limit: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

// ── Enums ──

/// Returned when a wire string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Closed string enum stored as TEXT and serialized as snake_case.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(Role, "role" {
    User => "user",
    Admin => "admin",
});

string_enum!(
    /// What a vote is cast on.
    TargetType, "target type" {
        Question => "question",
        Answer => "answer",
    }
);

string_enum!(VoteType, "vote type" {
    Upvote => "upvote",
    Downvote => "downvote",
});

impl VoteType {
    /// Contribution of one vote of this type to a post's score.
    pub fn value(self) -> i64 {
        match self {
            VoteType::Upvote => 1,
            VoteType::Downvote => -1,
        }
    }
}

string_enum!(NotificationKind, "notification type" {
    Answer => "answer",
    Vote => "vote",
    AcceptedAnswer => "accepted_answer",
    System => "system",
});

string_enum!(ReportTarget, "report target" {
    Question => "question",
    Answer => "answer",
    User => "user",
});

string_enum!(ReportReason, "report reason" {
    Spam => "spam",
    Inappropriate => "inappropriate",
    Offensive => "offensive",
    Plagiarism => "plagiarism",
    Harassment => "harassment",
    Other => "other",
});

string_enum!(
    /// Moderation progress: pending → reviewed → resolved | dismissed.
    ReportStatus, "report status" {
        Pending => "pending",
        Reviewed => "reviewed",
        Resolved => "resolved",
        Dismissed => "dismissed",
    }
);

impl ReportStatus {
    pub fn can_transition_to(self, next: ReportStatus) -> bool {
        use ReportStatus::*;
        matches!(
            (self, next),
            (Pending, Reviewed) | (Pending | Reviewed, Resolved) | (Pending | Reviewed, Dismissed)
        )
    }
}

string_enum!(
    /// Ordering applied to the question listing.
    QuestionFilter, "filter" {
        Newest => "newest",
        Unanswered => "unanswered",
        Active => "active",
        Votes => "votes",
    }
);

// ── Users ──

/// Author as embedded in questions, answers and notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub reputation: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub username: String,
    pub bio: String,
    pub role: Role,
    pub reputation: i64,
    pub is_active: bool,
    pub is_banned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban_reason: Option<String>,
    pub join_date: String,
    pub last_active: String,
    pub questions_asked: i64,
    pub answers_given: i64,
    pub accepted_answers: i64,
    pub total_votes_received: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: Profile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUp {
    pub name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Login {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

// ── Questions & answers ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub question_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub author: UserSummary,
    pub views: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub total_votes: i64,
    pub answer_count: i64,
    pub accepted_answer: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub author: UserSummary,
    pub content: String,
    pub upvotes: i64,
    pub downvotes: i64,
    pub total_votes: i64,
    pub is_accepted: bool,
    pub accepted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDetail {
    pub question: Question,
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQuestion {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateQuestion {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAnswer {
    pub content: String,
}

// ── Votes ──

/// Body of `POST /api/questions/vote`. Kept as strings so unknown values
/// surface as validation errors rather than body-parse errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVote {
    pub target_type: String,
    pub target_id: i64,
    pub vote_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    pub upvotes: i64,
    pub downvotes: i64,
    pub total_votes: i64,
    pub user_vote: Option<VoteType>,
}

// ── Notifications ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub sender: Option<UserSummary>,
    pub related_question: Option<i64>,
    pub related_question_title: Option<String>,
    pub related_answer: Option<i64>,
    pub is_read: bool,
    pub created_at: String,
    pub read_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub unread_count: i64,
}

// ── Moderation ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: i64,
    pub reporter: UserSummary,
    pub target_type: ReportTarget,
    pub target_id: i64,
    pub reason: ReportReason,
    pub description: String,
    pub status: ReportStatus,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<String>,
    pub resolution: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReport {
    pub target_type: String,
    pub target_id: i64,
    pub reason: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportAction {
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BanUser {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub total_users: i64,
    pub total_questions: i64,
    pub total_answers: i64,
    pub pending_reports: i64,
    pub banned_users: i64,
}

/// Rows whose denormalized counters were corrected by a recount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecountSummary {
    pub users: usize,
    pub questions: usize,
    pub answers: usize,
    pub tags: usize,
}
