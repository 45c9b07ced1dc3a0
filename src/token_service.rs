use crate::domain::{ConfirmationToken, Subscriber};
use crate::store::{Store, StoreError};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

pub type TokenGenerator = Arc<dyn Fn() -> ConfirmationToken + Send + Sync>;

/// Issues confirmation tokens that are unique among all stored subscribers.
#[derive(Clone)]
pub struct TokenService {
    generator: TokenGenerator,
}

impl Default for TokenService {
    fn default() -> Self {
        Self::with_generator(ConfirmationToken::generate)
    }
}

impl TokenService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator<F>(generator: F) -> Self
    where
        F: Fn() -> ConfirmationToken + Send + Sync + 'static,
    {
        Self {
            generator: Arc::new(generator),
        }
    }

    pub fn generate(&self) -> ConfirmationToken {
        (self.generator)()
    }

    /// Replaces the subscriber's token with one no stored subscriber holds.
    /// Collisions are retried with a fresh value. Nothing is persisted here;
    /// the store's unique constraint still guards the eventual write.
    #[tracing::instrument(name = "Issue confirmation token", skip_all, fields(subscriber_id = %subscriber.subscriber_id))]
    pub async fn issue(&self, store: &dyn Store, subscriber: &mut Subscriber) -> Result<(), StoreError> {
        loop {
            let candidate = self.generate();
            if !store.confirmation_token_exists(candidate.as_ref()).await? {
                subscriber.confirmation_token = candidate;
                return Ok(());
            }
            tracing::debug!("Generated confirmation token already exists, regenerating.");
        }
    }
}

/// A token never sent out is treated as expired.
pub fn is_expired(subscriber: &Subscriber, now: DateTime<Utc>, expiry_window: Duration) -> bool {
    match subscriber.verification_sent_at {
        Some(sent_at) => now >= sent_at + expiry_window,
        None => true,
    }
}
