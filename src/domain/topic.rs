use crate::utils::{contains_forbidden_characters, is_empty_or_whitespace, is_too_long};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicCode(String);

impl TopicCode {
    pub fn parse(s: String) -> Result<TopicCode, String> {
        if is_empty_or_whitespace(&s) {
            Err(String::from("A topic code is required."))
        } else if is_too_long(&s, 50) {
            Err(String::from("Topic code exceeds character limit."))
        } else if contains_forbidden_characters(&s) || s.chars().any(char::is_whitespace) {
            Err(format!("{} is not a valid topic code.", s))
        } else {
            Ok(Self(s))
        }
    }
}

impl AsRef<str> for TopicCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for TopicCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TopicCode::parse(value)
    }
}

impl From<TopicCode> for String {
    fn from(code: TopicCode) -> Self {
        code.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub topic_id: Uuid,
    pub name: String,
    pub code: TopicCode,
    pub parent_id: Option<Uuid>,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TopicTreeError {
    #[error("Topic {0} references an unknown parent topic.")]
    UnknownParent(Uuid),
    #[error("Topic {0} is part of a parent cycle.")]
    Cycle(Uuid),
}

/// Topics held in an arena with a parent index per slot.
#[derive(Debug, Default)]
pub struct TopicTree {
    topics: Vec<Topic>,
    index: HashMap<Uuid, usize>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
}

impl TopicTree {
    pub fn build(mut topics: Vec<Topic>) -> Result<TopicTree, TopicTreeError> {
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        let index: HashMap<Uuid, usize> = topics
            .iter()
            .enumerate()
            .map(|(slot, topic)| (topic.topic_id, slot))
            .collect();

        let mut parent = Vec::with_capacity(topics.len());
        let mut children = vec![Vec::new(); topics.len()];
        for (slot, topic) in topics.iter().enumerate() {
            let parent_slot = match topic.parent_id {
                Some(parent_id) => Some(
                    *index
                        .get(&parent_id)
                        .ok_or(TopicTreeError::UnknownParent(topic.topic_id))?,
                ),
                None => None,
            };
            if let Some(parent_slot) = parent_slot {
                children[parent_slot].push(slot);
            }
            parent.push(parent_slot);
        }

        let tree = Self {
            topics,
            index,
            parent,
            children,
        };
        tree.ensure_acyclic()?;

        Ok(tree)
    }

    fn ensure_acyclic(&self) -> Result<(), TopicTreeError> {
        for start in 0..self.topics.len() {
            let mut seen = HashSet::new();
            let mut current = Some(start);
            while let Some(slot) = current {
                if !seen.insert(slot) {
                    return Err(TopicTreeError::Cycle(self.topics[start].topic_id));
                }
                current = self.parent[slot];
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn get(&self, topic_id: &Uuid) -> Option<&Topic> {
        self.index.get(topic_id).map(|slot| &self.topics[*slot])
    }

    pub fn find_by_code(&self, code: &str) -> Option<&Topic> {
        self.topics.iter().find(|topic| topic.code.as_ref() == code)
    }

    /// Topics without a parent, the only ones a schedule dispatches directly.
    pub fn roots(&self) -> impl Iterator<Item = &Topic> {
        self.topics
            .iter()
            .enumerate()
            .filter(|(slot, _)| self.parent[*slot].is_none())
            .map(|(_, topic)| topic)
    }

    pub fn children(&self, topic_id: &Uuid) -> impl Iterator<Item = &Topic> {
        self.index
            .get(topic_id)
            .map(|slot| self.children[*slot].as_slice())
            .unwrap_or_default()
            .iter()
            .map(|slot| &self.topics[*slot])
    }

    /// The topic followed by all of its descendants, depth first.
    pub fn subtree_ids(&self, topic_id: &Uuid) -> Vec<Uuid> {
        let Some(start) = self.index.get(topic_id) else {
            return Vec::new();
        };
        let mut ids = Vec::new();
        let mut stack = vec![*start];
        while let Some(slot) = stack.pop() {
            ids.push(self.topics[slot].topic_id);
            stack.extend(self.children[slot].iter().rev());
        }

        ids
    }
}
