mod events;
mod notifier;

pub use events::{EventDispatcher, LifecycleEvent, LifecycleListener};
pub use notifier::MailNotifier;

use crate::clock::Clock;
use crate::configuration::SubscriptionSettings;
use crate::domain::{Schedule, Subscriber, SubscriberEmail, SubscriberStatus, TopicCode, TopicTree};
use crate::store::{Store, StoreError, UniqueField};
use crate::token_service::{TokenService, is_expired};
use crate::utils::error_chain_fmt;
use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

#[derive(thiserror::Error)]
pub enum SubscriptionError {
    #[error("{0} is not a known topic.")]
    UnknownTopic(TopicCode),
    #[error("The confirmation link has expired. Please request a new confirmation.")]
    ExpiredToken,
    #[error("No pending subscription matches this confirmation token.")]
    UnknownToken,
    #[error("No subscriber was found.")]
    UnknownSubscriber,
    #[error("The subscriber is not currently subscribed.")]
    NotSubscribed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl std::fmt::Debug for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    VerificationSent,
    /// A verification email went out too recently; nothing happened.
    CooldownActive,
    AlreadySubscribed,
    /// Verification is disabled and the subscriber was activated directly.
    Subscribed,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TopicSubscription {
    pub code: TopicCode,
    pub schedule: Schedule,
}

#[derive(Debug, Clone, Copy)]
pub struct SubscriptionPolicy {
    pub confirmation_expiry: Duration,
    pub verification_cooldown: Duration,
    pub require_verification: bool,
}

impl Default for SubscriptionPolicy {
    fn default() -> Self {
        Self {
            confirmation_expiry: Duration::days(3),
            verification_cooldown: Duration::minutes(5),
            require_verification: true,
        }
    }
}

impl From<&SubscriptionSettings> for SubscriptionPolicy {
    fn from(settings: &SubscriptionSettings) -> Self {
        Self {
            confirmation_expiry: settings.confirmation_expiry(),
            verification_cooldown: settings.verification_cooldown(),
            require_verification: settings.require_verification,
        }
    }
}

/// Drives subscribers through `unverified -> subscribed -> unsubscribed`.
///
/// Every transition persists the subscriber before its event is dispatched.
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn Store>,
    tokens: TokenService,
    clock: Arc<dyn Clock>,
    policy: SubscriptionPolicy,
    events: EventDispatcher,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: TokenService,
        clock: Arc<dyn Clock>,
        policy: SubscriptionPolicy,
        events: EventDispatcher,
    ) -> Self {
        Self {
            store,
            tokens,
            clock,
            policy,
            events,
        }
    }

    #[tracing::instrument(name = "Adding a new subscriber", skip(self, topics), fields(subscriber_email = %email))]
    pub async fn subscribe(
        &self,
        email: SubscriberEmail,
        topics: &[TopicSubscription],
    ) -> Result<VerificationOutcome, SubscriptionError> {
        let subscriptions = self.resolve_topic_codes(topics).await?;
        let (mut subscriber, created) = self.get_or_create(email).await?;

        if !subscriptions.is_empty() {
            self.store
                .add_topic_subscriptions(subscriber.subscriber_id, &subscriptions)
                .await?;
            subscriber.topics.extend(subscriptions);
        }

        if self.policy.require_verification {
            self.request_verification(subscriber, created).await
        } else {
            self.activate_without_verification(subscriber).await
        }
    }

    #[tracing::instrument(name = "Resending confirmation", skip(self), fields(subscriber_email = %email))]
    pub async fn resend(&self, email: &SubscriberEmail) -> Result<VerificationOutcome, SubscriptionError> {
        let subscriber = self
            .store
            .subscriber_by_email(email.as_ref())
            .await?
            .ok_or(SubscriptionError::UnknownSubscriber)?;

        self.request_verification(subscriber, false).await
    }

    /// Sends a confirmation email unless one went out within the cooldown.
    /// An existing subscriber's token is rotated first, which invalidates
    /// any earlier confirmation link.
    #[tracing::instrument(
        name = "Requesting verification",
        skip(self, subscriber),
        fields(subscriber_id = %subscriber.subscriber_id)
    )]
    pub async fn request_verification(
        &self,
        mut subscriber: Subscriber,
        created: bool,
    ) -> Result<VerificationOutcome, SubscriptionError> {
        if subscriber.status == SubscriberStatus::Subscribed {
            return Ok(VerificationOutcome::AlreadySubscribed);
        }
        let now = self.clock.now();
        if subscriber.verification_cooldown_active(now, self.policy.verification_cooldown) {
            tracing::info!("Verification email sent recently, skipping.");
            return Ok(VerificationOutcome::CooldownActive);
        }

        if !created {
            self.tokens.issue(self.store.as_ref(), &mut subscriber).await?;
        }
        subscriber.mark_verification_sent(now);
        self.save_with_fresh_token_on_collision(&mut subscriber).await?;

        self.events
            .dispatch(LifecycleEvent::EmailVerificationSent {
                subscriber_id: subscriber.subscriber_id,
                email: subscriber.email.clone(),
                confirmation_token: subscriber.confirmation_token.clone(),
            })
            .await;

        Ok(VerificationOutcome::VerificationSent)
    }

    #[tracing::instrument(name = "Confirming subscription", skip_all)]
    pub async fn confirm(&self, token: &str) -> Result<Subscriber, SubscriptionError> {
        let mut subscriber = self
            .store
            .unverified_subscriber_by_token(token)
            .await?
            .ok_or(SubscriptionError::UnknownToken)?;
        if is_expired(&subscriber, self.clock.now(), self.policy.confirmation_expiry) {
            return Err(SubscriptionError::ExpiredToken);
        }
        if !subscriber.mark_verified_subscribed() {
            return Err(SubscriptionError::UnknownToken);
        }
        self.store.update_subscriber(&subscriber).await?;

        self.events
            .dispatch(LifecycleEvent::Subscribed {
                subscriber_id: subscriber.subscriber_id,
                email: subscriber.email.clone(),
            })
            .await;

        Ok(subscriber)
    }

    pub async fn subscriber(&self, subscriber_id: Uuid) -> Result<Subscriber, SubscriptionError> {
        self.store
            .subscriber_by_id(subscriber_id)
            .await?
            .ok_or(SubscriptionError::UnknownSubscriber)
    }

    #[tracing::instrument(name = "Unsubscribing", skip(self))]
    pub async fn unsubscribe(&self, subscriber_id: Uuid) -> Result<Subscriber, SubscriptionError> {
        let mut subscriber = self.subscriber(subscriber_id).await?;
        if !subscriber.mark_unsubscribed() {
            return Err(SubscriptionError::NotSubscribed);
        }
        self.store.update_subscriber(&subscriber).await?;

        self.events
            .dispatch(LifecycleEvent::Unsubscribed {
                subscriber_id: subscriber.subscriber_id,
                email: subscriber.email.clone(),
            })
            .await;

        Ok(subscriber)
    }

    async fn activate_without_verification(
        &self,
        mut subscriber: Subscriber,
    ) -> Result<VerificationOutcome, SubscriptionError> {
        subscriber.reopen();
        if !subscriber.mark_verified_subscribed() {
            return Ok(VerificationOutcome::AlreadySubscribed);
        }
        self.store.update_subscriber(&subscriber).await?;

        self.events
            .dispatch(LifecycleEvent::Subscribed {
                subscriber_id: subscriber.subscriber_id,
                email: subscriber.email.clone(),
            })
            .await;

        Ok(VerificationOutcome::Subscribed)
    }

    async fn resolve_topic_codes(
        &self,
        topics: &[TopicSubscription],
    ) -> Result<Vec<(Uuid, Schedule)>, SubscriptionError> {
        if topics.is_empty() {
            return Ok(Vec::new());
        }
        let tree = TopicTree::build(self.store.topics().await?)
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;

        topics
            .iter()
            .map(|requested| {
                tree.find_by_code(requested.code.as_ref())
                    .map(|topic| (topic.topic_id, requested.schedule))
                    .ok_or_else(|| SubscriptionError::UnknownTopic(requested.code.clone()))
            })
            .collect()
    }

    async fn get_or_create(&self, email: SubscriberEmail) -> Result<(Subscriber, bool), StoreError> {
        loop {
            let mut candidate = Subscriber::new(email.clone(), self.tokens.generate(), self.clock.now());
            self.tokens.issue(self.store.as_ref(), &mut candidate).await?;
            match self.store.get_or_create_subscriber(&candidate).await {
                Err(StoreError::UniqueViolation(UniqueField::ConfirmationToken)) => {
                    tracing::warn!("Confirmation token collided on insert, retrying.");
                }
                outcome => return outcome,
            }
        }
    }

    async fn save_with_fresh_token_on_collision(
        &self,
        subscriber: &mut Subscriber,
    ) -> Result<(), StoreError> {
        loop {
            match self.store.update_subscriber(subscriber).await {
                Err(StoreError::UniqueViolation(UniqueField::ConfirmationToken)) => {
                    tracing::warn!("Confirmation token collided on update, retrying.");
                    self.tokens.issue(self.store.as_ref(), subscriber).await?;
                }
                outcome => return outcome,
            }
        }
    }
}
