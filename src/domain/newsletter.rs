use crate::domain::Schedule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stands in for the recipient's own unsubscribe link in stored bodies.
pub const UNSUBSCRIBE_URL_PLACEHOLDER: &str = "{{unsubscribe_url}}";

/// Output of the renderer, shared by every recipient of one topic in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedNewsletter {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Newsletter {
    pub newsletter_id: Uuid,
    pub run_id: Uuid,
    pub topic_id: Uuid,
    pub subject: String,
    pub html_content: String,
    pub text_content: String,
    pub schedule: Schedule,
    pub slug: String,
    pub is_sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Newsletter {
    pub fn new(
        run_id: Uuid,
        topic_id: Uuid,
        schedule: Schedule,
        rendered: RenderedNewsletter,
        now: DateTime<Utc>,
    ) -> Self {
        let newsletter_id = Uuid::new_v4();
        let short_id = newsletter_id.simple().to_string();
        let slug = format!(
            "{}-{}-{}",
            slug::slugify(&rendered.subject),
            now.format("%Y-%m-%d"),
            &short_id[..8]
        );

        Self {
            newsletter_id,
            run_id,
            topic_id,
            subject: rendered.subject,
            html_content: rendered.html_body,
            text_content: rendered.text_body,
            schedule,
            slug,
            is_sent: false,
            sent_at: None,
            created_at: now,
        }
    }

    /// HTML and plain text bodies addressed to a single recipient.
    pub fn personalise(&self, unsubscribe_url: &str) -> (String, String) {
        (
            self.html_content
                .replace(UNSUBSCRIBE_URL_PLACEHOLDER, unsubscribe_url),
            self.text_content
                .replace(UNSUBSCRIBE_URL_PLACEHOLDER, unsubscribe_url),
        )
    }
}
