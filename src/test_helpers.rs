use crate::dispatch::{MailConnection, MailTransport, TransportError};
use crate::domain::{
    ConfirmationToken, Paper, RenderedNewsletter, Schedule, Subscriber, SubscriberEmail,
    SubscriberStatus, Topic, TopicCode,
};
use crate::email_client::EmailMessage;
use crate::lifecycle::{LifecycleEvent, LifecycleListener};
use crate::renderer::{DigestRenderer, RenderContext, Renderer};
use crate::store::{InMemoryStore, Store};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use uuid::Uuid;

pub fn topic(name: &str, code: &str, parent_id: Option<Uuid>) -> Topic {
    Topic {
        topic_id: Uuid::new_v4(),
        name: name.to_string(),
        code: TopicCode::parse(code.to_string()).unwrap(),
        parent_id,
    }
}

pub fn paper(title: &str, topic_ids: &[Uuid], is_visible: bool) -> Paper {
    Paper {
        paper_id: Uuid::new_v4(),
        title: title.to_string(),
        authors: "Ada Lovelace, Alan Turing".to_string(),
        abstract_text: format!("Abstract of {title}."),
        summary: None,
        main_page: format!("https://arxiv.org/abs/{}", Uuid::new_v4().simple()),
        pdf_url: format!("https://arxiv.org/pdf/{}", Uuid::new_v4().simple()),
        is_visible,
        topic_ids: topic_ids.to_vec(),
    }
}

/// Inserts subscriber `n` in the given state. Sign-up times increase with `n`.
pub async fn seed_subscriber(
    store: &InMemoryStore,
    n: usize,
    status: SubscriberStatus,
    topics: &[(Uuid, Schedule)],
) -> Subscriber {
    let email = SubscriberEmail::parse(format!("reader{n:03}@example.com")).unwrap();
    let signed_up = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(n as i64);
    let mut subscriber = Subscriber::new(email, ConfirmationToken::generate(), signed_up);
    subscriber.verification_sent_at = Some(signed_up);
    subscriber.status = status;
    subscriber.verified = status == SubscriberStatus::Subscribed;
    subscriber.subscribed = status == SubscriberStatus::Subscribed;
    subscriber.topics.extend(topics.iter().copied());
    store.get_or_create_subscriber(&subscriber).await.unwrap();

    subscriber
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl LifecycleListener for RecordingListener {
    async fn handle(&self, event: &LifecycleEvent) -> Result<(), anyhow::Error> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct FailingListener;

#[async_trait]
impl LifecycleListener for FailingListener {
    async fn handle(&self, _event: &LifecycleEvent) -> Result<(), anyhow::Error> {
        Err(anyhow::anyhow!("The mail collaborator is down."))
    }
}

/// What a [`FakeTransport`] saw for one submitted batch.
#[derive(Debug, Clone)]
pub struct SentBatch {
    pub connection: usize,
    pub recipients: Vec<String>,
    pub subject: String,
    pub html_bodies: Vec<String>,
    pub failed: bool,
    /// When the batch finished, on the tokio clock.
    pub completed_at: tokio::time::Instant,
}

/// Records every batch and fails the batches whose (1-based) position in the
/// overall submission order is listed in `failing_batches`.
#[derive(Default)]
pub struct FakeTransport {
    state: Arc<FakeTransportState>,
}

#[derive(Default)]
struct FakeTransportState {
    failing_batches: Vec<usize>,
    fail_every_batch: bool,
    send_delay: StdDuration,
    connections_opened: AtomicUsize,
    submitted: AtomicUsize,
    batches: Mutex<Vec<SentBatch>>,
}

impl FakeTransport {
    pub fn failing_on(batches: &[usize]) -> Self {
        Self {
            state: Arc::new(FakeTransportState {
                failing_batches: batches.to_vec(),
                ..FakeTransportState::default()
            }),
        }
    }

    pub fn always_failing() -> Self {
        Self {
            state: Arc::new(FakeTransportState {
                fail_every_batch: true,
                ..FakeTransportState::default()
            }),
        }
    }

    /// Every batch takes `delay` to go through.
    pub fn slow(delay: StdDuration) -> Self {
        Self {
            state: Arc::new(FakeTransportState {
                send_delay: delay,
                ..FakeTransportState::default()
            }),
        }
    }

    pub fn batches(&self) -> Vec<SentBatch> {
        self.state.batches.lock().unwrap().clone()
    }

    pub fn connections_opened(&self) -> usize {
        self.state.connections_opened.load(Ordering::SeqCst)
    }
}

struct FakeConnection {
    id: usize,
    state: Arc<FakeTransportState>,
}

#[async_trait]
impl MailTransport for FakeTransport {
    async fn open_connection(&self) -> Result<Box<dyn MailConnection>, TransportError> {
        let id = self.state.connections_opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FakeConnection {
            id,
            state: self.state.clone(),
        }))
    }
}

#[async_trait]
impl MailConnection for FakeConnection {
    async fn send(&mut self, messages: &[EmailMessage<'_>]) -> Result<usize, TransportError> {
        if !self.state.send_delay.is_zero() {
            tokio::time::sleep(self.state.send_delay).await;
        }
        let position = self.state.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        let failed = self.state.fail_every_batch || self.state.failing_batches.contains(&position);
        self.state.batches.lock().unwrap().push(SentBatch {
            connection: self.id,
            recipients: messages
                .iter()
                .map(|m| m.recipient.as_ref().to_owned())
                .collect(),
            subject: messages
                .first()
                .map(|m| m.subject.to_owned())
                .unwrap_or_default(),
            html_bodies: messages.iter().map(|m| m.html_body.to_owned()).collect(),
            failed,
            completed_at: tokio::time::Instant::now(),
        });

        if failed {
            return Err(TransportError::Send(anyhow::anyhow!(
                "Batch {position} was refused by the provider."
            )));
        }
        Ok(messages.len())
    }
}

/// Fails renders, standing in for a broken template collaborator. Built with
/// [`FailingRenderer::only`], it fails a single topic after `delay` and
/// renders every other topic like [`DigestRenderer`].
#[derive(Default)]
pub struct FailingRenderer {
    only: Option<(String, StdDuration)>,
}

impl FailingRenderer {
    pub fn only(code: &str, delay: StdDuration) -> Self {
        Self {
            only: Some((code.to_owned(), delay)),
        }
    }
}

#[async_trait]
impl Renderer for FailingRenderer {
    fn subject(&self, topic: &Topic) -> String {
        DigestRenderer.subject(topic)
    }

    async fn render(
        &self,
        topic: &Topic,
        papers: &[Paper],
        context: &RenderContext,
    ) -> Result<RenderedNewsletter, anyhow::Error> {
        match &self.only {
            None => Err(anyhow::anyhow!("Template is missing.")),
            Some((code, delay)) if code == topic.code.as_ref() => {
                tokio::time::sleep(*delay).await;
                Err(anyhow::anyhow!("Template is missing."))
            }
            Some(_) => DigestRenderer.render(topic, papers, context).await,
        }
    }
}
