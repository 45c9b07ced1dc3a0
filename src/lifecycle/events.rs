use crate::domain::{ConfirmationToken, SubscriberEmail};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Emitted by lifecycle transitions once the new state is persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    EmailVerificationSent {
        subscriber_id: Uuid,
        email: SubscriberEmail,
        confirmation_token: ConfirmationToken,
    },
    Subscribed {
        subscriber_id: Uuid,
        email: SubscriberEmail,
    },
    Unsubscribed {
        subscriber_id: Uuid,
        email: SubscriberEmail,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::EmailVerificationSent { .. } => "email_verification_sent",
            LifecycleEvent::Subscribed { .. } => "subscribed",
            LifecycleEvent::Unsubscribed { .. } => "unsubscribed",
        }
    }

    pub fn subscriber_id(&self) -> Uuid {
        match self {
            LifecycleEvent::EmailVerificationSent { subscriber_id, .. }
            | LifecycleEvent::Subscribed { subscriber_id, .. }
            | LifecycleEvent::Unsubscribed { subscriber_id, .. } => *subscriber_id,
        }
    }
}

#[async_trait]
pub trait LifecycleListener: Send + Sync {
    async fn handle(&self, event: &LifecycleEvent) -> Result<(), anyhow::Error>;
}

/// Hands each event to every registered listener, in registration order.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Listener failures are logged and swallowed.
    pub async fn dispatch(&self, event: LifecycleEvent) {
        for listener in &self.listeners {
            if let Err(e) = listener.handle(&event).await {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    event = event.name(),
                    subscriber_id = %event.subscriber_id(),
                    "Lifecycle listener failed to handle event"
                );
            }
        }
    }
}
