#![forbid(unsafe_code)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::{Document, StoredDoc, USERS};

pub const UNKNOWN_USER: &str = "Unknown User";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl UserInfo {
    #[must_use]
    pub fn from_doc(id: &str, data: &Document) -> Option<Self> {
        let doc = StoredDoc {
            id: id.to_owned(),
            data: data.clone(),
        };
        let user: Self = doc.decode(USERS).ok()?;
        if user.display_name.is_none() && user.email.is_none() {
            return None;
        }
        Some(user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayUser {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub known: bool,
}

#[must_use]
pub fn prefer_known<T>(previous: Option<T>, incoming: Option<T>) -> Option<T> {
    incoming.or(previous)
}

#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: HashMap<String, UserInfo>,
}

impl UserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, id: &str, incoming: Option<UserInfo>) -> bool {
        let previous = self.users.remove(id);
        let merged = prefer_known(previous.clone(), incoming);
        let changed = merged != previous;
        if let Some(user) = merged {
            self.users.insert(id.to_owned(), user);
        }
        changed
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&UserInfo> {
        self.users.get(id)
    }

    pub fn missing<'a>(&self, ids: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        let mut out: Vec<String> = ids
            .into_iter()
            .filter(|id| !self.users.contains_key(id.as_str()))
            .cloned()
            .collect();
        out.sort();
        out.dedup();
        out
    }

    #[must_use]
    pub fn display(&self, id: &str) -> DisplayUser {
        match self.users.get(id) {
            Some(u) => DisplayUser {
                id: id.to_owned(),
                name: u
                    .display_name
                    .clone()
                    .or_else(|| u.email.clone())
                    .unwrap_or_else(|| UNKNOWN_USER.to_owned()),
                avatar: u.photo_url.clone(),
                known: true,
            },
            None => DisplayUser {
                id: id.to_owned(),
                name: UNKNOWN_USER.to_owned(),
                avatar: None,
                known: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, name: &str) -> UserInfo {
        UserInfo {
            id: id.to_owned(),
            display_name: Some(name.to_owned()),
            email: None,
            photo_url: None,
        }
    }

    #[test]
    fn missing_lookup_never_reverts_known_user() {
        let mut dir = UserDirectory::new();
        assert!(dir.merge("u1", Some(user("u1", "Ada"))));
        assert!(!dir.merge("u1", None));
        assert_eq!(dir.display("u1").name, "Ada");
        assert!(dir.display("u1").known);
    }

    #[test]
    fn newer_value_replaces_older() {
        let mut dir = UserDirectory::new();
        dir.merge("u1", Some(user("u1", "Ada")));
        assert!(dir.merge("u1", Some(user("u1", "Ada L."))));
        assert_eq!(dir.display("u1").name, "Ada L.");
    }

    #[test]
    fn unknown_ids_render_placeholder_and_are_reported_missing() {
        let mut dir = UserDirectory::new();
        dir.merge("u1", Some(user("u1", "Ada")));
        let ids = vec!["u2".to_owned(), "u1".to_owned(), "u2".to_owned()];
        assert_eq!(dir.missing(&ids), vec!["u2".to_owned()]);
        let d = dir.display("u2");
        assert_eq!(d.name, UNKNOWN_USER);
        assert!(!d.known);
    }
}
