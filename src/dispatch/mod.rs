mod batch;
mod transport;

pub use batch::{effective_batch_size, partition};
pub use transport::{MailConnection, MailTransport, PostmarkTransport, TransportError};

use crate::clock::Clock;
use crate::configuration::DispatchSettings;
use crate::domain::{
    Newsletter, RenderedNewsletter, Schedule, Topic, TopicCode, TopicTree, unsubscribe_url,
};
use crate::email_client::EmailMessage;
use crate::ledger::DeliveryLedger;
use crate::renderer::{RenderContext, Renderer};
use crate::resolver::{Recipient, RecipientResolver};
use crate::store::{Store, StoreError, UniqueField};
use crate::utils::error_chain_fmt;
use anyhow::Context;
use futures::{StreamExt, stream};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(thiserror::Error)]
pub enum DispatchError {
    #[error("Schedule {schedule} raised '{source}' error")]
    RunFatal {
        schedule: Schedule,
        #[source]
        source: anyhow::Error,
    },
}

impl std::fmt::Debug for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub batch_size: i64,
    pub batch_wait: Duration,
    pub topic_concurrency: usize,
    pub site_base_url: String,
}

impl From<&DispatchSettings> for DispatchConfig {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            batch_wait: settings.batch_wait(),
            topic_concurrency: settings.topic_concurrency,
            site_base_url: settings.site_base_url.clone(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TopicReport {
    pub topic_id: Uuid,
    pub topic_code: TopicCode,
    pub recipients: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub sent: usize,
    pub newsletter_id: Option<Uuid>,
    pub marked_sent: bool,
}

impl TopicReport {
    fn new(topic: &Topic) -> Self {
        Self {
            topic_id: topic.topic_id,
            topic_code: topic.code.clone(),
            recipients: 0,
            batches: 0,
            failed_batches: 0,
            sent: 0,
            newsletter_id: None,
            marked_sent: false,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub schedule: Schedule,
    pub topics: Vec<TopicReport>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn total_sent(&self) -> usize {
        self.topics.iter().map(|t| t.sent).sum()
    }

    pub fn topic(&self, code: &str) -> Option<&TopicReport> {
        self.topics.iter().find(|t| t.topic_code.as_ref() == code)
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Run {} ({}): {} emails sent across {} topics{}",
            self.run_id,
            self.schedule,
            self.total_sent(),
            self.topics.len(),
            if self.cancelled { ", cancelled" } else { "" }
        )?;
        for topic in &self.topics {
            writeln!(
                f,
                "  {}: {} recipients, {}/{} batches failed, {} sent{}",
                topic.topic_code,
                topic.recipients,
                topic.failed_batches,
                topic.batches,
                topic.sent,
                if topic.marked_sent { ", marked sent" } else { "" }
            )?;
        }

        Ok(())
    }
}

type RenderCache = Mutex<HashMap<(Uuid, String), Arc<Newsletter>>>;

enum Draft {
    Stored(Arc<Newsletter>),
    Rendered((Uuid, String), RenderedNewsletter),
}

/// Delivers one newsletter per root topic to its recipients in batches.
pub struct NewsletterDispatcher {
    store: Arc<dyn Store>,
    resolver: RecipientResolver,
    renderer: Arc<dyn Renderer>,
    transport: Arc<dyn MailTransport>,
    ledger: DeliveryLedger,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl NewsletterDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        renderer: Arc<dyn Renderer>,
        transport: Arc<dyn MailTransport>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        if config.batch_size <= 0 {
            tracing::warn!(
                batch_size = config.batch_size,
                "Batch size is not positive, every topic will be sent as a single batch."
            );
        }

        Self {
            resolver: RecipientResolver::new(store.clone()),
            ledger: DeliveryLedger::new(store.clone(), clock.clone()),
            store,
            renderer,
            transport,
            clock,
            config,
        }
    }

    /// Dispatches every root topic for `schedule`. Cancelling `cancel` stops
    /// new batches from starting; a batch already submitted completes.
    #[tracing::instrument(name = "Dispatching newsletters", skip(self, cancel), fields(run_id = tracing::field::Empty))]
    pub async fn run(
        &self,
        schedule: Schedule,
        cancel: CancellationToken,
    ) -> Result<RunReport, DispatchError> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let fatal = |source: anyhow::Error| DispatchError::RunFatal { schedule, source };

        let tree = self
            .resolver
            .topic_tree()
            .await
            .context("Failed to load the topic tree.")
            .map_err(fatal)?;
        let roots: Vec<&Topic> = tree.roots().collect();
        let cache = RenderCache::default();
        // Cancelled when a topic fails fatally. Topics still sending finish
        // their current batch and start no new one.
        let halt = cancel.child_token();

        let (tree, cache, halt_ref) = (&tree, &cache, &halt);
        let outcomes: Vec<Result<TopicReport, anyhow::Error>> = stream::iter(roots)
            .map(move |topic| async move {
                let outcome = self
                    .dispatch_topic(run_id, schedule, tree, topic, cache, halt_ref)
                    .await;
                if let Err(e) = &outcome {
                    tracing::error!(
                        error.cause_chain = ?e,
                        error.message = %e,
                        topic = %topic.code,
                        "Topic failed, halting the run."
                    );
                    halt_ref.cancel();
                }
                outcome
            })
            .buffer_unordered(self.config.topic_concurrency.max(1))
            .collect()
            .await;
        let mut topics = outcomes
            .into_iter()
            .collect::<Result<Vec<TopicReport>, _>>()
            .map_err(fatal)?;
        topics.sort_by(|a, b| a.topic_code.as_ref().cmp(b.topic_code.as_ref()));

        let delivered: Vec<Uuid> = topics
            .iter()
            .filter(|t| t.sent > 0)
            .filter_map(|t| t.newsletter_id)
            .collect();
        self.ledger
            .record_sent(&delivered)
            .await
            .context("Failed to record sent newsletters.")
            .map_err(fatal)?;
        for topic in topics.iter_mut() {
            topic.marked_sent = topic.newsletter_id.is_some_and(|id| delivered.contains(&id));
        }

        let report = RunReport {
            run_id,
            schedule,
            topics,
            cancelled: cancel.is_cancelled(),
        };
        tracing::info!(
            total_sent = report.total_sent(),
            cancelled = report.cancelled,
            "Dispatch run finished."
        );

        Ok(report)
    }

    #[tracing::instrument(
        name = "Dispatching topic",
        skip(self, tree, topic, cache, cancel),
        fields(topic = %topic.code)
    )]
    async fn dispatch_topic(
        &self,
        run_id: Uuid,
        schedule: Schedule,
        tree: &TopicTree,
        topic: &Topic,
        cache: &RenderCache,
        cancel: &CancellationToken,
    ) -> Result<TopicReport, anyhow::Error> {
        let mut report = TopicReport::new(topic);

        let recipients = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(report),
            recipients = self.resolver.resolve_in(tree, topic.topic_id, schedule) => {
                recipients.context("Failed to resolve recipients.")?
            }
        };
        report.recipients = recipients.len();
        if recipients.is_empty() {
            tracing::info!("No eligible recipients, skipping topic.");
            return Ok(report);
        }

        let draft = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(report),
            draft = self.draft_for(schedule, tree, topic, cache) => draft?,
        };
        // Not raced against cancellation, so a stored record is always used.
        let newsletter = match draft {
            Draft::Stored(newsletter) => newsletter,
            Draft::Rendered(key, rendered) => {
                self.store_newsletter(run_id, schedule, topic, key, rendered, cache)
                    .await?
            }
        };
        report.newsletter_id = Some(newsletter.newsletter_id);

        self.send_in_batches(&newsletter, &recipients, cancel, &mut report)
            .await;
        tracing::info!(
            sent = report.sent,
            failed_batches = report.failed_batches,
            "Topic dispatched."
        );

        Ok(report)
    }

    /// Renders the topic once per run; later requests reuse the stored record.
    async fn draft_for(
        &self,
        schedule: Schedule,
        tree: &TopicTree,
        topic: &Topic,
        cache: &RenderCache,
    ) -> Result<Draft, anyhow::Error> {
        let key = (topic.topic_id, self.renderer.subject(topic));
        if let Some(newsletter) = cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(Draft::Stored(newsletter.clone()));
        }

        let papers = self
            .store
            .visible_papers(&tree.subtree_ids(&topic.topic_id))
            .await
            .context("Failed to fetch papers.")?;
        let context = RenderContext {
            schedule,
            site_base_url: self.config.site_base_url.clone(),
        };
        let rendered = self
            .renderer
            .render(topic, &papers, &context)
            .await
            .context("Failed to render the newsletter.")?;

        Ok(Draft::Rendered(key, rendered))
    }

    async fn store_newsletter(
        &self,
        run_id: Uuid,
        schedule: Schedule,
        topic: &Topic,
        key: (Uuid, String),
        rendered: RenderedNewsletter,
        cache: &RenderCache,
    ) -> Result<Arc<Newsletter>, anyhow::Error> {
        let newsletter = loop {
            let candidate = Newsletter::new(
                run_id,
                topic.topic_id,
                schedule,
                rendered.clone(),
                self.clock.now(),
            );
            match self.store.insert_newsletter(&candidate).await {
                Ok(()) => break Arc::new(candidate),
                Err(StoreError::UniqueViolation(UniqueField::Slug)) => {
                    tracing::warn!(slug = %candidate.slug, "Newsletter slug taken, regenerating.");
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context("Failed to store the newsletter."));
                }
            }
        };
        cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, newsletter.clone());

        Ok(newsletter)
    }

    /// One connection serves the topic's batches until it fails; the next
    /// batch then opens a fresh one. Failed batches are not retried.
    async fn send_in_batches(
        &self,
        newsletter: &Newsletter,
        recipients: &[Recipient],
        cancel: &CancellationToken,
        report: &mut TopicReport,
    ) {
        let batch_size = effective_batch_size(self.config.batch_size, recipients.len());
        tracing::info!(batch_size, "Sending newsletter in batches.");
        let mut connection: Option<Box<dyn MailConnection>> = None;

        for (index, batch) in partition(recipients, batch_size).enumerate() {
            if index > 0 && !self.config.batch_wait.is_zero() {
                tracing::debug!(wait = ?self.config.batch_wait, "Throttling before next batch.");
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.batch_wait) => {}
                }
            }
            if cancel.is_cancelled() {
                tracing::warn!(remaining = recipients.len() - index * batch_size, "Run cancelled, stopping.");
                break;
            }
            report.batches += 1;

            if connection.is_none() {
                match self.transport.open_connection().await {
                    Ok(opened) => connection = Some(opened),
                    Err(e) => {
                        tracing::error!(
                            error.cause_chain = ?e,
                            error.message = %e,
                            batch = index + 1,
                            "Could not connect to the mail provider."
                        );
                        report.failed_batches += 1;
                        continue;
                    }
                }
            }
            let Some(active) = connection.as_mut() else {
                continue;
            };

            let bodies: Vec<(String, String)> = batch
                .iter()
                .map(|recipient| {
                    newsletter.personalise(&unsubscribe_url(
                        &self.config.site_base_url,
                        recipient.subscriber_id,
                    ))
                })
                .collect();
            let messages: Vec<EmailMessage> = batch
                .iter()
                .zip(&bodies)
                .map(|(recipient, (html_body, text_body))| EmailMessage {
                    recipient: &recipient.email,
                    subject: &newsletter.subject,
                    html_body,
                    text_body,
                })
                .collect();
            let outcome = active.send(&messages).await;
            match outcome {
                Ok(sent) => {
                    tracing::info!(batch = index + 1, sent, "Batch sent.");
                    report.sent += sent;
                }
                Err(e) => {
                    tracing::error!(
                        error.cause_chain = ?e,
                        error.message = %e,
                        batch = index + 1,
                        "Batch failed, reconnecting for the next one."
                    );
                    report.failed_batches += 1;
                    connection = None;
                }
            }
        }
    }
}
