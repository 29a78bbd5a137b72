//! Read-only topic lookup.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use rag_context_core::models::Topic;

#[async_trait]
pub trait TopicStore: Send + Sync {
    async fn get(&self, topic_id: &str) -> Result<Option<Topic>>;
}

/// Topics seeded from the `[[topics]]` config entries.
#[derive(Debug, Default)]
pub struct InMemoryTopicStore {
    topics: HashMap<String, Topic>,
}

impl InMemoryTopicStore {
    pub fn new(topics: impl IntoIterator<Item = Topic>) -> Self {
        Self {
            topics: topics.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[async_trait]
impl TopicStore for InMemoryTopicStore {
    async fn get(&self, topic_id: &str) -> Result<Option<Topic>> {
        Ok(self.topics.get(topic_id).cloned())
    }
}
