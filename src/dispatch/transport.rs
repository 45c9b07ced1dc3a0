use crate::configuration::EmailClientSettings;
use crate::email_client::{EmailClient, EmailMessage};
use crate::utils::error_chain_fmt;
use async_trait::async_trait;

#[derive(thiserror::Error)]
pub enum TransportError {
    #[error("Failed to open a connection to the mail provider.")]
    Connect(#[source] anyhow::Error),
    #[error("Failed to submit a batch to the mail provider.")]
    Send(#[source] anyhow::Error),
}

impl std::fmt::Debug for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Source of connections to the mail provider.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn open_connection(&self) -> Result<Box<dyn MailConnection>, TransportError>;
}

#[async_trait]
pub trait MailConnection: Send {
    /// Submits a batch and returns how many messages were accepted.
    async fn send(&mut self, messages: &[EmailMessage<'_>]) -> Result<usize, TransportError>;
}

impl std::fmt::Debug for dyn MailConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MailConnection")
    }
}

/// Talks to the email API; every connection gets its own HTTP client so a
/// reconnect starts from a fresh connection pool.
pub struct PostmarkTransport {
    settings: EmailClientSettings,
}

impl PostmarkTransport {
    pub fn new(settings: EmailClientSettings) -> Self {
        Self { settings }
    }
}

struct PostmarkConnection {
    email_client: EmailClient,
}

#[async_trait]
impl MailTransport for PostmarkTransport {
    async fn open_connection(&self) -> Result<Box<dyn MailConnection>, TransportError> {
        let email_client = self
            .settings
            .clone()
            .client()
            .map_err(TransportError::Connect)?;

        Ok(Box::new(PostmarkConnection { email_client }))
    }
}

#[async_trait]
impl MailConnection for PostmarkConnection {
    async fn send(&mut self, messages: &[EmailMessage<'_>]) -> Result<usize, TransportError> {
        self.email_client
            .send_batch(messages)
            .await
            .map_err(TransportError::Send)
    }
}
