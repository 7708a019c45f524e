#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Vote {
    Like,
    Dislike,
}

impl Vote {
    #[must_use]
    pub fn counter_field(self) -> &'static str {
        match self {
            Self::Like => "likeCount",
            Self::Dislike => "dislikeCount",
        }
    }

    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Like => Self::Dislike,
            Self::Dislike => Self::Like,
        }
    }
}

impl TryFrom<i64> for Vote {
    type Error = String;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::Like),
            -1 => Ok(Self::Dislike),
            other => Err(format!("invalid vote value {other}")),
        }
    }
}

impl From<Vote> for i64 {
    fn from(v: Vote) -> Self {
        match v {
            Vote::Like => 1,
            Vote::Dislike => -1,
        }
    }
}

pub type ReactionUsers = BTreeMap<String, BTreeMap<String, bool>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub task_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub author_id: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_avatar: Option<String>,
    pub text: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    /// Client clock at creation, used for ordering before the server time resolves.
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: Option<i64>,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub dislike_count: i64,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default)]
    pub reaction_counts: BTreeMap<String, i64>,
    #[serde(default)]
    pub reaction_users: ReactionUsers,
    #[serde(default)]
    pub voters: BTreeMap<String, Vote>,
}

impl Comment {
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    #[must_use]
    pub fn vote_of(&self, user_id: &str) -> Option<Vote> {
        self.voters.get(user_id).copied()
    }

    #[must_use]
    pub fn has_reacted(&self, user_id: &str, emoji: &str) -> bool {
        self.reaction_users
            .get(emoji)
            .is_some_and(|users| users.get(user_id).copied().unwrap_or(false))
    }

    #[must_use]
    pub fn reply_badge(&self) -> u64 {
        u64::try_from(self.reply_count).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewComment {
    pub task_id: String,
    pub text: String,
    pub author_id: String,
    pub author_name: Option<String>,
    pub author_avatar: Option<String>,
    pub parent_id: Option<String>,
}

impl NewComment {
    #[must_use]
    pub fn new(task_id: &str, author_id: &str, text: &str) -> Self {
        Self {
            task_id: task_id.to_owned(),
            author_id: author_id.to_owned(),
            text: text.to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn reply_to(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_owned());
        self
    }
}
