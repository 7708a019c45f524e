#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct OrderedSet(Vec<String>);

pub type TagSet = OrderedSet;
pub type AssigneeSet = OrderedSet;

impl OrderedSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if self.contains(&value) {
            return false;
        }
        self.0.push(value);
        true
    }

    pub fn remove(&mut self, value: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|v| v != value);
        before != self.0.len()
    }

    pub fn toggle(&mut self, value: &str) -> bool {
        if self.remove(value) {
            false
        } else {
            self.0.push(value.to_owned());
            true
        }
    }

    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|v| v == value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn parse_list(input: &str) -> Self {
        input.split(',').filter_map(normalize_tag).collect()
    }
}

impl From<Vec<String>> for OrderedSet {
    fn from(values: Vec<String>) -> Self {
        values.into_iter().collect()
    }
}

impl From<OrderedSet> for Vec<String> {
    fn from(set: OrderedSet) -> Self {
        set.0
    }
}

impl FromIterator<String> for OrderedSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = Self::new();
        for v in iter {
            set.insert(v);
        }
        set
    }
}

impl<'a> IntoIterator for &'a OrderedSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[must_use]
pub fn normalize_tag(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() { None } else { Some(t.to_owned()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTag {
    pub id: String,
    pub name: String,
    pub color: String,
}

impl ProjectTag {
    #[must_use]
    pub fn new(name: &str, color: &str) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("tag-{}", &id[..8]),
            name: name.to_owned(),
            color: color.to_owned(),
        }
    }
}

// Older project documents stored bare tag names.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawProjectTag {
    Name(String),
    Tag {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        color: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagRegistry {
    tags: Vec<ProjectTag>,
}

impl TagRegistry {
    #[must_use]
    pub fn from_value(raw: Option<&Value>, default_color: &str) -> Self {
        let mut registry = Self::default();
        let Some(Value::Array(items)) = raw else {
            return registry;
        };
        for item in items {
            let Ok(tag) = serde_json::from_value::<RawProjectTag>(item.clone()) else {
                continue;
            };
            let tag = match tag {
                RawProjectTag::Name(name) => ProjectTag::new(name.trim(), default_color),
                RawProjectTag::Tag { id, name, color } => {
                    let mut t = ProjectTag::new(name.trim(), default_color);
                    if !id.is_empty() {
                        t.id = id;
                    }
                    if !color.is_empty() {
                        t.color = color;
                    }
                    t
                }
            };
            if tag.name.is_empty() || registry.contains(&tag.name) {
                continue;
            }
            registry.tags.push(tag);
        }
        registry
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.tags).unwrap_or(Value::Array(Vec::new()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name == name)
    }

    pub fn union(&mut self, name: &str, color: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.tags.push(ProjectTag::new(name, color));
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t.name != name);
        before != self.tags.len()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProjectTag> {
        self.tags.iter().find(|t| t.name == name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tags.iter().map(|t| t.name.clone()).collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[must_use]
pub fn union_sorted<'a>(sources: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut names: Vec<String> = sources
        .into_iter()
        .filter_map(|s| normalize_tag(s))
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ordered_set_dedupes_and_keeps_order() {
        let set: OrderedSet = vec!["b".to_owned(), "a".to_owned(), "b".to_owned()].into();
        assert_eq!(set.as_slice(), ["b", "a"]);

        let decoded: OrderedSet = serde_json::from_value(json!(["x", "x", "y"])).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(serde_json::to_value(&decoded).unwrap(), json!(["x", "y"]));
    }

    #[test]
    fn toggle_flips_membership() {
        let mut set = OrderedSet::new();
        assert!(set.toggle("urgent"));
        assert!(set.contains("urgent"));
        assert!(!set.toggle("urgent"));
        assert!(set.is_empty());
    }

    #[test]
    fn parse_list_splits_and_trims() {
        let set = OrderedSet::parse_list(" ui, backend ,, ui ");
        assert_eq!(set.as_slice(), ["ui", "backend"]);
    }

    #[test]
    fn registry_accepts_legacy_strings_and_objects() {
        let raw = json!([
            "design",
            { "id": "tag-1", "name": "backend", "color": "red" },
            { "name": "design", "color": "blue" },
            42
        ]);
        let reg = TagRegistry::from_value(Some(&raw), "grey");
        assert_eq!(reg.names(), vec!["backend", "design"]);
        assert_eq!(reg.get("backend").unwrap().color, "red");
        assert_eq!(reg.get("design").unwrap().color, "grey");
    }

    #[test]
    fn registry_union_is_idempotent() {
        let mut reg = TagRegistry::default();
        assert!(reg.union("qa", "grey"));
        assert!(!reg.union("qa", "grey"));
        assert_eq!(reg.len(), 1);
        assert!(reg.remove("qa"));
        assert!(!reg.remove("qa"));
    }
}
