use crate::domain::unsubscribe_url;
use crate::email_client::EmailClient;
use crate::lifecycle::{LifecycleEvent, LifecycleListener};
use async_trait::async_trait;
use std::sync::Arc;

/// Sends the verification and welcome emails.
pub struct MailNotifier {
    email_client: Arc<EmailClient>,
    base_url: String,
}

impl MailNotifier {
    pub fn new(email_client: Arc<EmailClient>, base_url: String) -> Self {
        Self {
            email_client,
            base_url,
        }
    }

    pub fn confirmation_link(&self, token: &str) -> String {
        format!(
            "{}/subscriptions/confirm?token={}",
            self.base_url.trim_end_matches('/'),
            token
        )
    }
}

#[async_trait]
impl LifecycleListener for MailNotifier {
    async fn handle(&self, event: &LifecycleEvent) -> Result<(), anyhow::Error> {
        match event {
            LifecycleEvent::EmailVerificationSent {
                email,
                confirmation_token,
                ..
            } => {
                let confirmation_link = self.confirmation_link(confirmation_token.as_ref());
                let html_body = format!(
                    "Welcome to ArxivDigest!<br />\
                    Click <a href=\"{}\">here</a> to confirm your subscription.",
                    confirmation_link
                );
                let plain_body = format!(
                    "Welcome to ArxivDigest!\nVisit {} to confirm your subscription.",
                    confirmation_link
                );
                self.email_client
                    .send_email(email, "Confirm your ArxivDigest subscription", &html_body, &plain_body)
                    .await
            }
            LifecycleEvent::Subscribed { email, subscriber_id } => {
                let unsubscribe_link = unsubscribe_url(&self.base_url, *subscriber_id);
                let html_body = format!(
                    "Your ArxivDigest subscription is active.<br />\
                    You can <a href=\"{}\">unsubscribe</a> at any time.",
                    unsubscribe_link
                );
                let plain_body = format!(
                    "Your ArxivDigest subscription is active.\nYou can unsubscribe at any time via {}.",
                    unsubscribe_link
                );
                self.email_client
                    .send_email(email, "Welcome to ArxivDigest", &html_body, &plain_body)
                    .await
            }
            LifecycleEvent::Unsubscribed { .. } => Ok(()),
        }
    }
}
