mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::domain::{Newsletter, Paper, Schedule, Subscriber, Topic};
use crate::utils::error_chain_fmt;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    ConfirmationToken,
    Slug,
}

impl std::fmt::Display for UniqueField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueField::Email => f.write_str("email"),
            UniqueField::ConfirmationToken => f.write_str("confirmation token"),
            UniqueField::Slug => f.write_str("slug"),
        }
    }
}

#[derive(thiserror::Error)]
pub enum StoreError {
    #[error("A record with the same {0} already exists.")]
    UniqueViolation(UniqueField),
    #[error("Stored record is invalid: {0}")]
    Corrupted(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Persistence for subscribers, the topic catalogue and rendered newsletters.
///
/// Implementations enforce uniqueness of subscriber emails, confirmation
/// tokens and newsletter slugs, reporting collisions as
/// [`StoreError::UniqueViolation`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts `candidate` and its topic subscriptions unless a subscriber
    /// with the same email exists. Returns the stored subscriber and whether
    /// it was created.
    async fn get_or_create_subscriber(
        &self,
        candidate: &Subscriber,
    ) -> Result<(Subscriber, bool), StoreError>;

    async fn subscriber_by_id(&self, subscriber_id: Uuid) -> Result<Option<Subscriber>, StoreError>;

    async fn subscriber_by_email(&self, email: &str) -> Result<Option<Subscriber>, StoreError>;

    /// Only subscribers still awaiting confirmation are matched.
    async fn unverified_subscriber_by_token(
        &self,
        token: &str,
    ) -> Result<Option<Subscriber>, StoreError>;

    async fn confirmation_token_exists(&self, token: &str) -> Result<bool, StoreError>;

    /// Persists token, flags, status and `verification_sent_at`. Topic
    /// subscriptions are written through [`Store::add_topic_subscriptions`].
    async fn update_subscriber(&self, subscriber: &Subscriber) -> Result<(), StoreError>;

    async fn add_topic_subscriptions(
        &self,
        subscriber_id: Uuid,
        subscriptions: &[(Uuid, Schedule)],
    ) -> Result<(), StoreError>;

    /// Subscribers holding a subscription with `schedule` to any of
    /// `topic_ids`. May include ineligible subscribers.
    async fn subscribers_for_topics(
        &self,
        topic_ids: &[Uuid],
        schedule: Schedule,
    ) -> Result<Vec<Subscriber>, StoreError>;

    async fn insert_topic(&self, topic: &Topic) -> Result<(), StoreError>;

    async fn topics(&self) -> Result<Vec<Topic>, StoreError>;

    async fn insert_paper(&self, paper: &Paper) -> Result<(), StoreError>;

    /// Visible papers attached to any of `topic_ids`, without duplicates.
    async fn visible_papers(&self, topic_ids: &[Uuid]) -> Result<Vec<Paper>, StoreError>;

    async fn insert_newsletter(&self, newsletter: &Newsletter) -> Result<(), StoreError>;

    async fn newsletter_by_id(&self, newsletter_id: Uuid) -> Result<Option<Newsletter>, StoreError>;

    /// Flags unsent newsletters among `newsletter_ids` as sent. Returns how
    /// many records changed; already sent records are left untouched.
    async fn mark_newsletters_sent(
        &self,
        newsletter_ids: &[Uuid],
        sent_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}
