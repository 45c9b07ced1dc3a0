use crate::domain::{Newsletter, Paper, Schedule, Subscriber, SubscriberStatus, Topic};
use crate::store::{Store, StoreError, UniqueField};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    subscribers: HashMap<Uuid, Subscriber>,
    topics: Vec<Topic>,
    papers: Vec<Paper>,
    newsletters: Vec<Newsletter>,
}

/// Process-local [`Store`] with the same uniqueness rules as the database.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation fails as if the backing store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn newsletters(&self) -> Vec<Newsletter> {
        self.lock()
            .map(|state| state.newsletters.clone())
            .unwrap_or_default()
    }

    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.lock()
            .map(|state| state.subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unexpected(anyhow::anyhow!(
                "The in-memory store is unavailable."
            )));
        }

        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl State {
    fn token_taken(&self, token: &str, except: Uuid) -> bool {
        self.subscribers
            .values()
            .any(|s| s.subscriber_id != except && s.confirmation_token.as_ref() == token)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_or_create_subscriber(
        &self,
        candidate: &Subscriber,
    ) -> Result<(Subscriber, bool), StoreError> {
        let mut state = self.lock()?;

        if let Some(existing) = state
            .subscribers
            .values()
            .find(|s| s.email == candidate.email)
        {
            return Ok((existing.clone(), false));
        }
        if state.token_taken(candidate.confirmation_token.as_ref(), candidate.subscriber_id) {
            return Err(StoreError::UniqueViolation(UniqueField::ConfirmationToken));
        }
        state
            .subscribers
            .insert(candidate.subscriber_id, candidate.clone());

        Ok((candidate.clone(), true))
    }

    async fn subscriber_by_id(&self, subscriber_id: Uuid) -> Result<Option<Subscriber>, StoreError> {
        Ok(self.lock()?.subscribers.get(&subscriber_id).cloned())
    }

    async fn subscriber_by_email(&self, email: &str) -> Result<Option<Subscriber>, StoreError> {
        Ok(self
            .lock()?
            .subscribers
            .values()
            .find(|s| s.email.as_ref() == email)
            .cloned())
    }

    async fn unverified_subscriber_by_token(
        &self,
        token: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        Ok(self
            .lock()?
            .subscribers
            .values()
            .find(|s| {
                s.status == SubscriberStatus::Unverified && s.confirmation_token.as_ref() == token
            })
            .cloned())
    }

    async fn confirmation_token_exists(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.token_taken(token, Uuid::nil()))
    }

    async fn update_subscriber(&self, subscriber: &Subscriber) -> Result<(), StoreError> {
        let mut state = self.lock()?;

        if state.token_taken(subscriber.confirmation_token.as_ref(), subscriber.subscriber_id) {
            return Err(StoreError::UniqueViolation(UniqueField::ConfirmationToken));
        }
        let stored = state
            .subscribers
            .get_mut(&subscriber.subscriber_id)
            .ok_or_else(|| anyhow::anyhow!("Subscriber {} does not exist.", subscriber.subscriber_id))?;
        stored.confirmation_token = subscriber.confirmation_token.clone();
        stored.verification_sent_at = subscriber.verification_sent_at;
        stored.verified = subscriber.verified;
        stored.subscribed = subscriber.subscribed;
        stored.status = subscriber.status;

        Ok(())
    }

    async fn add_topic_subscriptions(
        &self,
        subscriber_id: Uuid,
        subscriptions: &[(Uuid, Schedule)],
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let stored = state
            .subscribers
            .get_mut(&subscriber_id)
            .ok_or_else(|| anyhow::anyhow!("Subscriber {} does not exist.", subscriber_id))?;
        stored.topics.extend(subscriptions.iter().copied());

        Ok(())
    }

    async fn subscribers_for_topics(
        &self,
        topic_ids: &[Uuid],
        schedule: Schedule,
    ) -> Result<Vec<Subscriber>, StoreError> {
        let state = self.lock()?;
        let mut subscribers: Vec<Subscriber> = state
            .subscribers
            .values()
            .filter(|s| {
                topic_ids
                    .iter()
                    .any(|topic_id| s.topics.get(topic_id) == Some(&schedule))
            })
            .cloned()
            .collect();
        subscribers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));

        Ok(subscribers)
    }

    async fn insert_topic(&self, topic: &Topic) -> Result<(), StoreError> {
        self.lock()?.topics.push(topic.clone());

        Ok(())
    }

    async fn topics(&self) -> Result<Vec<Topic>, StoreError> {
        Ok(self.lock()?.topics.clone())
    }

    async fn insert_paper(&self, paper: &Paper) -> Result<(), StoreError> {
        self.lock()?.papers.push(paper.clone());

        Ok(())
    }

    async fn visible_papers(&self, topic_ids: &[Uuid]) -> Result<Vec<Paper>, StoreError> {
        let wanted: HashSet<&Uuid> = topic_ids.iter().collect();

        Ok(self
            .lock()?
            .papers
            .iter()
            .filter(|p| p.is_visible && p.topic_ids.iter().any(|id| wanted.contains(id)))
            .cloned()
            .collect())
    }

    async fn insert_newsletter(&self, newsletter: &Newsletter) -> Result<(), StoreError> {
        let mut state = self.lock()?;

        if state.newsletters.iter().any(|n| n.slug == newsletter.slug) {
            return Err(StoreError::UniqueViolation(UniqueField::Slug));
        }
        state.newsletters.push(newsletter.clone());

        Ok(())
    }

    async fn newsletter_by_id(&self, newsletter_id: Uuid) -> Result<Option<Newsletter>, StoreError> {
        Ok(self
            .lock()?
            .newsletters
            .iter()
            .find(|n| n.newsletter_id == newsletter_id)
            .cloned())
    }

    async fn mark_newsletters_sent(
        &self,
        newsletter_ids: &[Uuid],
        sent_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let mut updated = 0;
        for newsletter in state
            .newsletters
            .iter_mut()
            .filter(|n| !n.is_sent && newsletter_ids.contains(&n.newsletter_id))
        {
            newsletter.is_sent = true;
            newsletter.sent_at = Some(sent_at);
            updated += 1;
        }

        Ok(updated)
    }
}
