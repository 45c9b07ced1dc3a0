use crate::domain::{Schedule, SubscriberEmail, TopicTree};
use crate::store::{Store, StoreError};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub subscriber_id: Uuid,
    pub email: SubscriberEmail,
}

/// Computes who receives a topic's newsletter for a schedule.
#[derive(Clone)]
pub struct RecipientResolver {
    store: Arc<dyn Store>,
}

impl RecipientResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn topic_tree(&self) -> Result<TopicTree, StoreError> {
        let topics = self.store.topics().await?;
        TopicTree::build(topics).map_err(|e| StoreError::Corrupted(e.to_string()))
    }

    pub async fn resolve(
        &self,
        topic_id: Uuid,
        schedule: Schedule,
    ) -> Result<Vec<Recipient>, StoreError> {
        let tree = self.topic_tree().await?;
        self.resolve_in(&tree, topic_id, schedule).await
    }

    /// Eligible subscribers of `topic_id` or any of its subtopics, each
    /// listed once, ordered by sign-up time and then email.
    #[tracing::instrument(name = "Resolving recipients", skip(self, tree))]
    pub async fn resolve_in(
        &self,
        tree: &TopicTree,
        topic_id: Uuid,
        schedule: Schedule,
    ) -> Result<Vec<Recipient>, StoreError> {
        let subtree = tree.subtree_ids(&topic_id);
        if subtree.is_empty() {
            tracing::warn!("Topic is not part of the topic tree.");
            return Ok(Vec::new());
        }

        let mut candidates = self.store.subscribers_for_topics(&subtree, schedule).await?;
        candidates.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.email.cmp(&b.email))
        });

        let mut seen = HashSet::new();
        let recipients: Vec<Recipient> = candidates
            .into_iter()
            .filter(|subscriber| {
                subtree
                    .iter()
                    .any(|topic_id| subscriber.is_eligible_for(topic_id, schedule))
            })
            .filter(|subscriber| seen.insert(subscriber.subscriber_id))
            .map(|subscriber| Recipient {
                subscriber_id: subscriber.subscriber_id,
                email: subscriber.email,
            })
            .collect();

        if recipients.is_empty() {
            tracing::info!("No eligible recipients.");
        }

        Ok(recipients)
    }
}
