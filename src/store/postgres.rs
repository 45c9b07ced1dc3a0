use crate::domain::{
    ConfirmationToken, Newsletter, Paper, Schedule, Subscriber, SubscriberEmail, SubscriberStatus,
    Topic, TopicCode,
};
use crate::store::{Store, StoreError, UniqueField};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

const SUBSCRIBER_COLUMNS: &str = r#"
    subscriber_id,
    email,
    confirmation_token,
    verification_sent_at,
    verified,
    subscribed,
    status,
    created_at
"#;

const NEWSLETTER_COLUMNS: &str = r#"
    newsletter_id,
    run_id,
    topic_id,
    subject,
    html_content,
    text_content,
    schedule,
    slug,
    is_sent,
    sent_at,
    created_at
"#;

/// [`Store`] backed by PostgreSQL. Uniqueness is enforced by the schema's
/// constraints, so concurrent writers cannot both claim the same token.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn attach_topics(
        &self,
        mut subscribers: Vec<Subscriber>,
    ) -> Result<Vec<Subscriber>, StoreError> {
        if subscribers.is_empty() {
            return Ok(subscribers);
        }
        let ids: Vec<Uuid> = subscribers.iter().map(|s| s.subscriber_id).collect();
        let rows = sqlx::query(
            r#"
              SELECT subscriber_id, topic_id, schedule
              FROM topic_subscriptions
              WHERE subscriber_id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch topic subscriptions.")?;

        let mut topics: HashMap<Uuid, BTreeMap<Uuid, Schedule>> = HashMap::new();
        for row in rows {
            let subscriber_id: Uuid = row.try_get("subscriber_id").map_err(corrupted)?;
            let topic_id: Uuid = row.try_get("topic_id").map_err(corrupted)?;
            let schedule: String = row.try_get("schedule").map_err(corrupted)?;
            let schedule = Schedule::try_from(schedule).map_err(StoreError::Corrupted)?;
            topics
                .entry(subscriber_id)
                .or_default()
                .insert(topic_id, schedule);
        }
        for subscriber in subscribers.iter_mut() {
            if let Some(subscribed_topics) = topics.remove(&subscriber.subscriber_id) {
                subscriber.topics = subscribed_topics;
            }
        }

        Ok(subscribers)
    }

    async fn fetch_subscriber(
        &self,
        condition: &str,
        value: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        let query = format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE {condition}");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch subscriber.")?;

        match row {
            Some(row) => {
                let subscriber = subscriber_from_row(&row)?;
                Ok(self.attach_topics(vec![subscriber]).await?.pop())
            }
            None => Ok(None),
        }
    }
}

fn corrupted(e: sqlx::Error) -> StoreError {
    StoreError::Corrupted(e.to_string())
}

fn map_write_error(e: sqlx::Error, action: &'static str) -> StoreError {
    if let sqlx::Error::Database(db_error) = &e {
        if db_error.is_unique_violation() {
            let field = match db_error.constraint() {
                Some("subscribers_email_key") => Some(UniqueField::Email),
                Some("subscribers_confirmation_token_key") => Some(UniqueField::ConfirmationToken),
                Some("newsletters_slug_key") => Some(UniqueField::Slug),
                _ => None,
            };
            if let Some(field) = field {
                return StoreError::UniqueViolation(field);
            }
        }
    }

    StoreError::Unexpected(anyhow::Error::new(e).context(action))
}

fn subscriber_from_row(row: &PgRow) -> Result<Subscriber, StoreError> {
    let email: String = row.try_get("email").map_err(corrupted)?;
    let token: String = row.try_get("confirmation_token").map_err(corrupted)?;
    let status: String = row.try_get("status").map_err(corrupted)?;

    Ok(Subscriber {
        subscriber_id: row.try_get("subscriber_id").map_err(corrupted)?,
        email: SubscriberEmail::parse(email).map_err(StoreError::Corrupted)?,
        confirmation_token: ConfirmationToken::parse(token).map_err(StoreError::Corrupted)?,
        verification_sent_at: row.try_get("verification_sent_at").map_err(corrupted)?,
        verified: row.try_get("verified").map_err(corrupted)?,
        subscribed: row.try_get("subscribed").map_err(corrupted)?,
        status: SubscriberStatus::try_from(status).map_err(StoreError::Corrupted)?,
        topics: BTreeMap::new(),
        created_at: row.try_get("created_at").map_err(corrupted)?,
    })
}

impl TryFrom<PgRow> for Topic {
    type Error = StoreError;

    fn try_from(row: PgRow) -> Result<Self, Self::Error> {
        let code: String = row.try_get("code").map_err(corrupted)?;

        Ok(Self {
            topic_id: row.try_get("topic_id").map_err(corrupted)?,
            name: row.try_get("name").map_err(corrupted)?,
            code: TopicCode::parse(code).map_err(StoreError::Corrupted)?,
            parent_id: row.try_get("parent_id").map_err(corrupted)?,
        })
    }
}

impl TryFrom<PgRow> for Paper {
    type Error = StoreError;

    fn try_from(row: PgRow) -> Result<Self, Self::Error> {
        Ok(Self {
            paper_id: row.try_get("paper_id").map_err(corrupted)?,
            title: row.try_get("title").map_err(corrupted)?,
            authors: row.try_get("authors").map_err(corrupted)?,
            abstract_text: row.try_get("abstract").map_err(corrupted)?,
            summary: row.try_get("summary").map_err(corrupted)?,
            main_page: row.try_get("main_page").map_err(corrupted)?,
            pdf_url: row.try_get("pdf_url").map_err(corrupted)?,
            is_visible: row.try_get("is_visible").map_err(corrupted)?,
            topic_ids: row.try_get("topic_ids").map_err(corrupted)?,
        })
    }
}

impl TryFrom<PgRow> for Newsletter {
    type Error = StoreError;

    fn try_from(row: PgRow) -> Result<Self, Self::Error> {
        let schedule: String = row.try_get("schedule").map_err(corrupted)?;

        Ok(Self {
            newsletter_id: row.try_get("newsletter_id").map_err(corrupted)?,
            run_id: row.try_get("run_id").map_err(corrupted)?,
            topic_id: row.try_get("topic_id").map_err(corrupted)?,
            subject: row.try_get("subject").map_err(corrupted)?,
            html_content: row.try_get("html_content").map_err(corrupted)?,
            text_content: row.try_get("text_content").map_err(corrupted)?,
            schedule: Schedule::try_from(schedule).map_err(StoreError::Corrupted)?,
            slug: row.try_get("slug").map_err(corrupted)?,
            is_sent: row.try_get("is_sent").map_err(corrupted)?,
            sent_at: row.try_get("sent_at").map_err(corrupted)?,
            created_at: row.try_get("created_at").map_err(corrupted)?,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    #[tracing::instrument(name = "Get or create subscriber", skip_all, fields(email = %candidate.email))]
    async fn get_or_create_subscriber(
        &self,
        candidate: &Subscriber,
    ) -> Result<(Subscriber, bool), StoreError> {
        let inserted = sqlx::query(
            r#"
              INSERT INTO subscribers (
                subscriber_id,
                email,
                confirmation_token,
                verification_sent_at,
                verified,
                subscribed,
                status,
                created_at
              )
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
              ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(candidate.subscriber_id)
        .bind(candidate.email.as_ref())
        .bind(candidate.confirmation_token.as_ref())
        .bind(candidate.verification_sent_at)
        .bind(candidate.verified)
        .bind(candidate.subscribed)
        .bind(candidate.status.as_str())
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Failed to insert subscriber."))?
        .rows_affected()
            == 1;
        if inserted && !candidate.topics.is_empty() {
            let topics: Vec<(Uuid, Schedule)> = candidate
                .topics
                .iter()
                .map(|(topic_id, schedule)| (*topic_id, *schedule))
                .collect();
            self.add_topic_subscriptions(candidate.subscriber_id, &topics)
                .await?;
        }

        let stored = self
            .fetch_subscriber("email = $1", candidate.email.as_ref())
            .await?
            .ok_or_else(|| anyhow::anyhow!("Subscriber vanished after get-or-create."))?;

        Ok((stored, inserted))
    }

    async fn subscriber_by_id(&self, subscriber_id: Uuid) -> Result<Option<Subscriber>, StoreError> {
        self.fetch_subscriber("subscriber_id = $1::uuid", &subscriber_id.to_string())
            .await
    }

    async fn subscriber_by_email(&self, email: &str) -> Result<Option<Subscriber>, StoreError> {
        self.fetch_subscriber("email = $1", email).await
    }

    async fn unverified_subscriber_by_token(
        &self,
        token: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        self.fetch_subscriber("confirmation_token = $1 AND status = 'unverified'", token)
            .await
    }

    async fn confirmation_token_exists(&self, token: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM subscribers WHERE confirmation_token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up confirmation token.")?;

        Ok(row.is_some())
    }

    #[tracing::instrument(name = "Update subscriber", skip_all, fields(subscriber_id = %subscriber.subscriber_id))]
    async fn update_subscriber(&self, subscriber: &Subscriber) -> Result<(), StoreError> {
        sqlx::query(
            r#"
              UPDATE subscribers
              SET confirmation_token = $1,
                  verification_sent_at = $2,
                  verified = $3,
                  subscribed = $4,
                  status = $5
              WHERE subscriber_id = $6
            "#,
        )
        .bind(subscriber.confirmation_token.as_ref())
        .bind(subscriber.verification_sent_at)
        .bind(subscriber.verified)
        .bind(subscriber.subscribed)
        .bind(subscriber.status.as_str())
        .bind(subscriber.subscriber_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Failed to update subscriber."))?;

        Ok(())
    }

    async fn add_topic_subscriptions(
        &self,
        subscriber_id: Uuid,
        subscriptions: &[(Uuid, Schedule)],
    ) -> Result<(), StoreError> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .context("Failed to acquire a Postgres connection from the pool.")?;
        for (topic_id, schedule) in subscriptions {
            sqlx::query(
                r#"
                  INSERT INTO topic_subscriptions (subscriber_id, topic_id, schedule)
                  VALUES ($1, $2, $3)
                  ON CONFLICT (subscriber_id, topic_id) DO UPDATE SET schedule = EXCLUDED.schedule
                "#,
            )
            .bind(subscriber_id)
            .bind(topic_id)
            .bind(schedule.as_str())
            .execute(&mut *transaction)
            .await
            .map_err(|e| map_write_error(e, "Failed to store topic subscription."))?;
        }
        transaction
            .commit()
            .await
            .context("Failed to commit topic subscriptions.")?;

        Ok(())
    }

    #[tracing::instrument(name = "Fetch subscribers for topics", skip(self, topic_ids))]
    async fn subscribers_for_topics(
        &self,
        topic_ids: &[Uuid],
        schedule: Schedule,
    ) -> Result<Vec<Subscriber>, StoreError> {
        let query = format!(
            r#"
              SELECT {SUBSCRIBER_COLUMNS}
              FROM subscribers
              WHERE verified AND subscribed
                AND subscriber_id IN (
                  SELECT subscriber_id
                  FROM topic_subscriptions
                  WHERE topic_id = ANY($1) AND schedule = $2
                )
              ORDER BY created_at, email
            "#
        );
        let rows = sqlx::query(&query)
            .bind(topic_ids.to_vec())
            .bind(schedule.as_str())
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch subscribers for topics.")?;
        let subscribers = rows
            .iter()
            .map(subscriber_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        self.attach_topics(subscribers).await
    }

    async fn insert_topic(&self, topic: &Topic) -> Result<(), StoreError> {
        sqlx::query(
            r#"
              INSERT INTO topics (topic_id, name, code, parent_id, created_at)
              VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(topic.topic_id)
        .bind(&topic.name)
        .bind(topic.code.as_ref())
        .bind(topic.parent_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Failed to insert topic."))?;

        Ok(())
    }

    async fn topics(&self) -> Result<Vec<Topic>, StoreError> {
        let rows = sqlx::query("SELECT topic_id, name, code, parent_id FROM topics ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch topics.")?;

        rows.into_iter().map(Topic::try_from).collect()
    }

    async fn insert_paper(&self, paper: &Paper) -> Result<(), StoreError> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .context("Failed to acquire a Postgres connection from the pool.")?;
        sqlx::query(
            r#"
              INSERT INTO papers (
                paper_id,
                title,
                authors,
                abstract,
                summary,
                main_page,
                pdf_url,
                is_visible,
                created_at
              )
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
            "#,
        )
        .bind(paper.paper_id)
        .bind(&paper.title)
        .bind(&paper.authors)
        .bind(&paper.abstract_text)
        .bind(&paper.summary)
        .bind(&paper.main_page)
        .bind(&paper.pdf_url)
        .bind(paper.is_visible)
        .execute(&mut *transaction)
        .await
        .map_err(|e| map_write_error(e, "Failed to insert paper."))?;
        for topic_id in &paper.topic_ids {
            sqlx::query("INSERT INTO paper_topics (paper_id, topic_id) VALUES ($1, $2)")
                .bind(paper.paper_id)
                .bind(topic_id)
                .execute(&mut *transaction)
                .await
                .map_err(|e| map_write_error(e, "Failed to attach paper to topic."))?;
        }
        transaction
            .commit()
            .await
            .context("Failed to commit paper.")?;

        Ok(())
    }

    async fn visible_papers(&self, topic_ids: &[Uuid]) -> Result<Vec<Paper>, StoreError> {
        let rows = sqlx::query(
            r#"
              SELECT
                papers.paper_id,
                papers.title,
                papers.authors,
                papers.abstract,
                papers.summary,
                papers.main_page,
                papers.pdf_url,
                papers.is_visible,
                array_agg(paper_topics.topic_id) AS topic_ids
              FROM papers
              JOIN paper_topics ON papers.paper_id = paper_topics.paper_id
              WHERE papers.is_visible
                AND papers.paper_id IN (
                  SELECT paper_id FROM paper_topics WHERE topic_id = ANY($1)
                )
              GROUP BY papers.paper_id
              ORDER BY papers.created_at DESC
            "#,
        )
        .bind(topic_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch papers.")?;

        rows.into_iter().map(Paper::try_from).collect()
    }

    #[tracing::instrument(name = "Insert newsletter", skip_all, fields(slug = %newsletter.slug))]
    async fn insert_newsletter(&self, newsletter: &Newsletter) -> Result<(), StoreError> {
        sqlx::query(
            r#"
              INSERT INTO newsletters (
                newsletter_id,
                run_id,
                topic_id,
                subject,
                html_content,
                text_content,
                schedule,
                slug,
                is_sent,
                sent_at,
                created_at
              )
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(newsletter.newsletter_id)
        .bind(newsletter.run_id)
        .bind(newsletter.topic_id)
        .bind(&newsletter.subject)
        .bind(&newsletter.html_content)
        .bind(&newsletter.text_content)
        .bind(newsletter.schedule.as_str())
        .bind(&newsletter.slug)
        .bind(newsletter.is_sent)
        .bind(newsletter.sent_at)
        .bind(newsletter.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Failed to insert newsletter."))?;

        Ok(())
    }

    async fn newsletter_by_id(&self, newsletter_id: Uuid) -> Result<Option<Newsletter>, StoreError> {
        let query = format!("SELECT {NEWSLETTER_COLUMNS} FROM newsletters WHERE newsletter_id = $1");
        let row = sqlx::query(&query)
            .bind(newsletter_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch newsletter.")?;

        row.map(Newsletter::try_from).transpose()
    }

    #[tracing::instrument(name = "Mark newsletters as sent", skip(self))]
    async fn mark_newsletters_sent(
        &self,
        newsletter_ids: &[Uuid],
        sent_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
              UPDATE newsletters
              SET is_sent = true,
                  sent_at = $2
              WHERE newsletter_id = ANY($1) AND NOT is_sent
            "#,
        )
        .bind(newsletter_ids.to_vec())
        .bind(sent_at)
        .execute(&self.pool)
        .await
        .context("Failed to mark newsletters as sent.")?;

        Ok(result.rows_affected())
    }
}
