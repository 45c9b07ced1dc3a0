use crate::domain::SubscriberEmail;
use anyhow::Context;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, Secret};
use std::time::Duration;

/// One message of a batch: a shared rendered body addressed to a single
/// recipient.
#[derive(Debug, Clone, Copy)]
pub struct EmailMessage<'a> {
    pub recipient: &'a SubscriberEmail,
    pub subject: &'a str,
    pub html_body: &'a str,
    pub text_body: &'a str,
}

#[derive(Debug, Clone)]
pub struct EmailClient {
    http_client: Client,
    base_url: Url,
    sender: SubscriberEmail,
    authorization_token: Secret<String>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html_body: &'a str,
    text_body: &'a str,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BatchEntryResponse {
    error_code: i64,
    #[serde(default)]
    message: String,
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: SubscriberEmail,
        authorization_token: Secret<String>,
        timeout: Duration,
    ) -> Result<Self, anyhow::Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build the email HTTP client.")?;
        let base_url = Url::parse(&base_url)
            .with_context(|| format!("Invalid email API base url: {base_url}"))?;

        Ok(Self {
            http_client,
            base_url,
            sender,
            authorization_token,
        })
    }

    fn endpoint(&self, route: &str) -> Result<Url, anyhow::Error> {
        self.base_url
            .join(route)
            .with_context(|| format!("Failed to join `{route}` to the email API url."))
    }

    fn request(&self, url: Url) -> reqwest::RequestBuilder {
        self.http_client
            .post(url)
            .header(
                "X-Postmark-Server-Token",
                self.authorization_token.expose_secret(),
            )
    }

    #[tracing::instrument(name = "Send email", skip_all, fields(recipient = %recipient))]
    pub async fn send_email(
        &self,
        recipient: &SubscriberEmail,
        subject: &str,
        html_content: &str,
        text_content: &str,
    ) -> Result<(), anyhow::Error> {
        let url = self.endpoint("email")?;
        let request_body = SendEmailRequest {
            from: self.sender.as_ref(),
            to: recipient.as_ref(),
            subject,
            html_body: html_content,
            text_body: text_content,
        };

        self.request(url)
            .json(&request_body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    /// Submits every message in one round-trip. Returns how many messages the
    /// API accepted; a non-2xx response fails the whole batch.
    #[tracing::instrument(name = "Send email batch", skip_all, fields(batch_len = messages.len()))]
    pub async fn send_batch(&self, messages: &[EmailMessage<'_>]) -> Result<usize, anyhow::Error> {
        if messages.is_empty() {
            return Ok(0);
        }
        let url = self.endpoint("email/batch")?;
        let request_body: Vec<SendEmailRequest> = messages
            .iter()
            .map(|message| SendEmailRequest {
                from: self.sender.as_ref(),
                to: message.recipient.as_ref(),
                subject: message.subject,
                html_body: message.html_body,
                text_body: message.text_body,
            })
            .collect();

        let entries: Vec<BatchEntryResponse> = self
            .request(url)
            .json(&request_body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("The email API returned an unreadable batch response.")?;

        let mut accepted = 0;
        for entry in entries {
            if entry.error_code == 0 {
                accepted += 1;
            } else {
                tracing::warn!(
                    error_code = entry.error_code,
                    "Email API rejected a message: {}",
                    entry.message
                );
            }
        }

        Ok(accepted)
    }
}
