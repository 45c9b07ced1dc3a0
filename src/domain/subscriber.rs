use crate::domain::{ConfirmationToken, Schedule, SubscriberEmail};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberStatus {
    Unverified,
    Subscribed,
    Unsubscribed,
}

impl SubscriberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriberStatus::Unverified => "unverified",
            SubscriberStatus::Subscribed => "subscribed",
            SubscriberStatus::Unsubscribed => "unsubscribed",
        }
    }
}

impl TryFrom<String> for SubscriberStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "unverified" => Ok(SubscriberStatus::Unverified),
            "subscribed" => Ok(SubscriberStatus::Subscribed),
            "unsubscribed" => Ok(SubscriberStatus::Unsubscribed),
            other => Err(format!("{} is not a valid subscriber status.", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subscriber {
    pub subscriber_id: Uuid,
    pub email: SubscriberEmail,
    pub confirmation_token: ConfirmationToken,
    pub verification_sent_at: Option<DateTime<Utc>>,
    pub verified: bool,
    pub subscribed: bool,
    pub status: SubscriberStatus,
    /// Subscribed topics and the cadence chosen for each of them.
    pub topics: BTreeMap<Uuid, Schedule>,
    pub created_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn new(email: SubscriberEmail, confirmation_token: ConfirmationToken, now: DateTime<Utc>) -> Self {
        Self {
            subscriber_id: Uuid::new_v4(),
            email,
            confirmation_token,
            verification_sent_at: None,
            verified: false,
            subscribed: false,
            status: SubscriberStatus::Unverified,
            topics: BTreeMap::new(),
            created_at: now,
        }
    }

    /// `verified ∧ subscribed ∧ topic ∈ topics`
    pub fn is_eligible(&self, topic_id: &Uuid) -> bool {
        self.verified && self.subscribed && self.topics.contains_key(topic_id)
    }

    pub fn is_eligible_for(&self, topic_id: &Uuid, schedule: Schedule) -> bool {
        self.is_eligible(topic_id) && self.topics.get(topic_id) == Some(&schedule)
    }

    pub fn verification_cooldown_active(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.verification_sent_at
            .is_some_and(|sent_at| sent_at >= now - cooldown)
    }

    pub fn mark_verification_sent(&mut self, now: DateTime<Utc>) {
        self.verification_sent_at = Some(now);
        self.reopen();
    }

    /// Moves an unsubscribed subscriber back to awaiting confirmation.
    pub fn reopen(&mut self) {
        if self.status == SubscriberStatus::Unsubscribed {
            self.status = SubscriberStatus::Unverified;
        }
    }

    /// Returns `false` when the subscriber is not awaiting confirmation.
    pub fn mark_verified_subscribed(&mut self) -> bool {
        if self.status != SubscriberStatus::Unverified {
            return false;
        }
        self.verified = true;
        self.subscribed = true;
        self.status = SubscriberStatus::Subscribed;

        true
    }

    /// Returns `false` unless the subscriber is currently verified and subscribed.
    pub fn mark_unsubscribed(&mut self) -> bool {
        if self.status != SubscriberStatus::Subscribed {
            return false;
        }
        self.verified = false;
        self.subscribed = false;
        self.status = SubscriberStatus::Unsubscribed;

        true
    }
}

/// Page where the subscriber can stop receiving emails.
pub fn unsubscribe_url(base_url: &str, subscriber_id: Uuid) -> String {
    format!(
        "{}/subscriptions/{}/unsubscribe",
        base_url.trim_end_matches('/'),
        subscriber_id
    )
}
