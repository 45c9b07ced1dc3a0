use crate::helpers::spawn_pg_store;
use arxiv_digest::domain::{
    ConfirmationToken, Newsletter, Paper, RenderedNewsletter, Schedule, Subscriber,
    SubscriberEmail, SubscriberStatus, Topic, TopicCode,
};
use arxiv_digest::store::{PgStore, Store, StoreError, UniqueField};
use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

fn subscriber(email: &str) -> Subscriber {
    Subscriber::new(
        SubscriberEmail::parse(email.to_string()).unwrap(),
        ConfirmationToken::generate(),
        Utc::now(),
    )
}

async fn insert_topic(store: &PgStore, code: &str, parent_id: Option<Uuid>) -> Topic {
    let topic = Topic {
        topic_id: Uuid::new_v4(),
        name: format!("Topic {code}"),
        code: TopicCode::parse(code.to_string()).unwrap(),
        parent_id,
    };
    store.insert_topic(&topic).await.unwrap();
    topic
}

fn paper(title: &str, topic_ids: &[Uuid], is_visible: bool) -> Paper {
    Paper {
        paper_id: Uuid::new_v4(),
        title: title.to_string(),
        authors: "Ada Lovelace".to_string(),
        abstract_text: format!("Abstract of {title}."),
        summary: None,
        main_page: format!("https://arxiv.org/abs/{}", Uuid::new_v4().simple()),
        pdf_url: format!("https://arxiv.org/pdf/{}", Uuid::new_v4().simple()),
        is_visible,
        topic_ids: topic_ids.to_vec(),
    }
}

fn newsletter(topic_id: Uuid) -> Newsletter {
    Newsletter::new(
        Uuid::new_v4(),
        topic_id,
        Schedule::Weekly,
        RenderedNewsletter {
            subject: "ArxivDigest - Robotics".to_string(),
            html_body: "<p>Robots</p>".to_string(),
            text_body: "Robots".to_string(),
        },
        Utc::now(),
    )
}

#[tokio::test]
async fn the_first_subscriber_of_an_email_is_kept() {
    // Arrange
    let store = spawn_pg_store().await;
    let topic = insert_topic(&store, "cs.RO", None).await;
    let mut first = subscriber("ursula@example.com");
    first.topics.insert(topic.topic_id, Schedule::Daily);

    // Act
    let (created, was_created) = store.get_or_create_subscriber(&first).await.unwrap();
    let (existing, created_again) = store
        .get_or_create_subscriber(&subscriber("ursula@example.com"))
        .await
        .unwrap();

    // Assert
    assert!(was_created);
    assert!(!created_again);
    assert_eq!(created.subscriber_id, first.subscriber_id);
    assert_eq!(existing.subscriber_id, first.subscriber_id);
    assert_eq!(existing.topics.get(&topic.topic_id), Some(&Schedule::Daily));
}

#[tokio::test]
async fn a_reused_confirmation_token_is_reported_as_such() {
    // Arrange
    let store = spawn_pg_store().await;
    let first = subscriber("ursula@example.com");
    store.get_or_create_subscriber(&first).await.unwrap();
    let mut second = subscriber("le.guin@example.com");
    second.confirmation_token = first.confirmation_token.clone();

    // Act
    let outcome = store.get_or_create_subscriber(&second).await;

    // Assert
    assert!(matches!(
        outcome,
        Err(StoreError::UniqueViolation(UniqueField::ConfirmationToken))
    ));
}

#[tokio::test]
async fn rotating_onto_a_taken_token_is_reported_as_such() {
    // Arrange
    let store = spawn_pg_store().await;
    let first = subscriber("ursula@example.com");
    let (mut second, _) = store
        .get_or_create_subscriber(&subscriber("le.guin@example.com"))
        .await
        .unwrap();
    store.get_or_create_subscriber(&first).await.unwrap();
    second.confirmation_token = first.confirmation_token.clone();

    // Act
    let outcome = store.update_subscriber(&second).await;

    // Assert
    assert!(matches!(
        outcome,
        Err(StoreError::UniqueViolation(UniqueField::ConfirmationToken))
    ));
}

#[tokio::test]
async fn a_reused_slug_is_reported_as_such() {
    // Arrange
    let store = spawn_pg_store().await;
    let topic = insert_topic(&store, "cs.RO", None).await;
    let first = newsletter(topic.topic_id);
    store.insert_newsletter(&first).await.unwrap();
    let mut second = newsletter(topic.topic_id);
    second.slug = first.slug.clone();

    // Act
    let outcome = store.insert_newsletter(&second).await;

    // Assert
    assert!(matches!(
        outcome,
        Err(StoreError::UniqueViolation(UniqueField::Slug))
    ));
}

#[tokio::test]
async fn marking_a_newsletter_sent_twice_changes_nothing_the_second_time() {
    // Arrange
    let store = spawn_pg_store().await;
    let topic = insert_topic(&store, "cs.RO", None).await;
    let newsletter = newsletter(topic.topic_id);
    store.insert_newsletter(&newsletter).await.unwrap();
    let ids = [newsletter.newsletter_id];

    // Act
    let first = store.mark_newsletters_sent(&ids, Utc::now()).await.unwrap();
    let after_first = store
        .newsletter_by_id(newsletter.newsletter_id)
        .await
        .unwrap()
        .unwrap();
    let second = store.mark_newsletters_sent(&ids, Utc::now()).await.unwrap();
    let after_second = store
        .newsletter_by_id(newsletter.newsletter_id)
        .await
        .unwrap()
        .unwrap();

    // Assert
    assert_eq!(first, 1);
    assert_eq!(second, 0);
    assert!(after_first.is_sent);
    assert!(after_first.sent_at.is_some());
    assert_eq!(after_second.sent_at, after_first.sent_at);
}

#[tokio::test]
async fn only_unverified_subscribers_are_found_by_token() {
    // Arrange
    let store = spawn_pg_store().await;
    let (mut confirmed, _) = store
        .get_or_create_subscriber(&subscriber("ursula@example.com"))
        .await
        .unwrap();
    let (pending, _) = store
        .get_or_create_subscriber(&subscriber("le.guin@example.com"))
        .await
        .unwrap();
    confirmed.verified = true;
    confirmed.subscribed = true;
    confirmed.status = SubscriberStatus::Subscribed;
    store.update_subscriber(&confirmed).await.unwrap();

    // Act
    let by_confirmed_token = store
        .unverified_subscriber_by_token(confirmed.confirmation_token.as_ref())
        .await
        .unwrap();
    let by_pending_token = store
        .unverified_subscriber_by_token(pending.confirmation_token.as_ref())
        .await
        .unwrap();

    // Assert
    assert!(by_confirmed_token.is_none());
    assert_eq!(
        by_pending_token.map(|s| s.subscriber_id),
        Some(pending.subscriber_id)
    );
    assert!(
        store
            .confirmation_token_exists(confirmed.confirmation_token.as_ref())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn visible_papers_are_listed_once_with_all_their_topics() {
    // Arrange
    let store = spawn_pg_store().await;
    let cs = insert_topic(&store, "cs", None).await;
    let ai = insert_topic(&store, "cs.AI", Some(cs.topic_id)).await;
    let math = insert_topic(&store, "math", None).await;
    let shared = paper("Shared", &[cs.topic_id, ai.topic_id, math.topic_id], true);
    store.insert_paper(&shared).await.unwrap();
    store
        .insert_paper(&paper("Hidden", &[ai.topic_id], false))
        .await
        .unwrap();
    store
        .insert_paper(&paper("Elsewhere", &[math.topic_id], true))
        .await
        .unwrap();

    // Act
    let papers = store
        .visible_papers(&[cs.topic_id, ai.topic_id])
        .await
        .unwrap();

    // Assert
    assert_eq!(papers.len(), 1);
    assert_eq!(papers[0].paper_id, shared.paper_id);
    let topic_ids: HashSet<Uuid> = papers[0].topic_ids.iter().copied().collect();
    assert_eq!(
        topic_ids,
        HashSet::from([cs.topic_id, ai.topic_id, math.topic_id])
    );
}

#[tokio::test]
async fn only_verified_and_subscribed_readers_are_candidates() {
    // Arrange
    let store = spawn_pg_store().await;
    let ai = insert_topic(&store, "cs.AI", None).await;
    let mut pending = subscriber("le.guin@example.com");
    pending.topics.insert(ai.topic_id, Schedule::Weekly);
    store.get_or_create_subscriber(&pending).await.unwrap();
    let mut reader = subscriber("ursula@example.com");
    reader.verified = true;
    reader.subscribed = true;
    reader.status = SubscriberStatus::Subscribed;
    reader.topics.insert(ai.topic_id, Schedule::Weekly);
    store.get_or_create_subscriber(&reader).await.unwrap();

    // Act
    let weekly = store
        .subscribers_for_topics(&[ai.topic_id], Schedule::Weekly)
        .await
        .unwrap();
    let daily = store
        .subscribers_for_topics(&[ai.topic_id], Schedule::Daily)
        .await
        .unwrap();

    // Assert
    assert_eq!(weekly.len(), 1);
    assert_eq!(weekly[0].subscriber_id, reader.subscriber_id);
    assert!(weekly[0].is_eligible_for(&ai.topic_id, Schedule::Weekly));
    assert!(daily.is_empty());
}
