use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Roles ──

/// Forum role carried in the user row and the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Member,
    Moderator,
    Streamer,
    Admin,
}

/// Privileged actions gated on a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ManageTags,
    ManageUsers,
    /// Delete other users' posts, reconcile vote totals.
    ModerateContent,
}

impl Role {
    pub fn can(self, capability: Capability) -> bool {
        match capability {
            Capability::ManageTags | Capability::ManageUsers | Capability::ModerateContent => {
                self == Role::Admin
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Member => "Member",
            Role::Moderator => "Moderator",
            Role::Streamer => "Streamer",
            Role::Admin => "Admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role '{}'", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Member" => Ok(Role::Member),
            "Moderator" => Ok(Role::Moderator),
            "Streamer" => Ok(Role::Streamer),
            "Admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

// ── Users ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub wallet: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub avatar_url: String,
    pub role: Role,
    pub reputation: i64,
    pub is_active: bool,
    pub created_at: String,
    pub last_seen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRequest {
    pub wallet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub level: i64,
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub characters: Vec<Character>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProfile {
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub wallet: String,
    #[serde(default)]
    pub avatar_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUserStatus {
    pub is_active: bool,
    pub role: String,
}

// ── Posts ──

/// Discriminator of a votable post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Question,
    Answer,
}

impl PostKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PostKind::Question => "question",
            PostKind::Answer => "answer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPostKind(pub String);

impl fmt::Display for UnknownPostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "post_type must be 'question' or 'answer', got '{}'", self.0)
    }
}

impl std::error::Error for UnknownPostKind {}

impl FromStr for PostKind {
    type Err = UnknownPostKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "question" => Ok(PostKind::Question),
            "answer" => Ok(PostKind::Answer),
            other => Err(UnknownPostKind(other.to_string())),
        }
    }
}

/// A reference to a question or an answer by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostRef {
    Question(i64),
    Answer(i64),
}

impl PostRef {
    pub fn new(kind: PostKind, id: i64) -> Self {
        match kind {
            PostKind::Question => PostRef::Question(id),
            PostKind::Answer => PostRef::Answer(id),
        }
    }

    pub fn kind(self) -> PostKind {
        match self {
            PostRef::Question(_) => PostKind::Question,
            PostRef::Answer(_) => PostKind::Answer,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            PostRef::Question(id) | PostRef::Answer(id) => id,
        }
    }
}

impl fmt::Display for PostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind().as_str(), self.id())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub body: String,
    pub votes: i64,
    pub view_count: i64,
    pub answer_count: i64,
    pub is_solved: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(flatten)]
    pub author: Author,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub user_id: i64,
    pub body: String,
    pub votes: i64,
    pub is_accepted: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(flatten)]
    pub author: Author,
}

/// An answer listed on its author's profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAnswer {
    #[serde(flatten)]
    pub answer: Answer,
    pub question_title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDetail {
    #[serde(flatten)]
    pub question: Question,
    pub tags: Vec<Tag>,
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQuestion {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateQuestion {
    pub title: String,
    pub body: String,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerBody {
    pub body: String,
}

// ── Tags ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub usage_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

// ── Votes ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVote {
    pub post_type: String,
    pub post_id: i64,
    pub r#type: i64,
}

/// What a cast did to the caller's ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteAction {
    Registered,
    Updated,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub action: VoteAction,
    pub message: String,
    /// `None` when the voted post does not exist.
    pub vote_count: Option<i64>,
    pub user_vote: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserVote {
    pub id: i64,
    pub user_id: i64,
    pub post_id: i64,
    pub post_type: PostKind,
    pub r#type: i64,
    pub created_at: String,
    pub post_content: Option<String>,
}

// ── Responses ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Created {
    pub id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admin_holds_capabilities() {
        for role in [Role::Member, Role::Moderator, Role::Streamer] {
            assert!(!role.can(Capability::ManageTags));
            assert!(!role.can(Capability::ManageUsers));
            assert!(!role.can(Capability::ModerateContent));
        }
        assert!(Role::Admin.can(Capability::ManageTags));
        assert!(Role::Admin.can(Capability::ModerateContent));
    }

    #[test]
    fn role_names_match_storage() {
        assert_eq!("Streamer".parse::<Role>(), Ok(Role::Streamer));
        assert_eq!(Role::Admin.to_string(), "Admin");
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn post_ref_resolves_kind() {
        let post = PostRef::new("answer".parse().unwrap(), 42);
        assert_eq!(post, PostRef::Answer(42));
        assert_eq!(post.kind(), PostKind::Answer);
        assert_eq!(post.to_string(), "answer#42");
        assert!("comment".parse::<PostKind>().is_err());
    }
}
