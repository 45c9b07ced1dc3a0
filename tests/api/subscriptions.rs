use crate::helpers::{spawn_app, spawn_app_with};
use arxiv_digest::domain::{Schedule, SubscriberStatus};
use arxiv_digest::utils::{ResponseErrorMessage, ResponseMessage};
use claims::assert_ok;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn subscribe_returns_a_200_for_valid_data() {
    // Arrange
    let app = spawn_app().await;
    app.create_topic("Artificial Intelligence", "cs.AI", None).await;

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.email_server)
        .await;

    // Act
    let response = app
        .post_subscriptions(&serde_json::json!({
            "email": "ursula_le_guin@gmail.com",
            "topics": [{"code": "cs.AI", "schedule": "weekly"}]
        }))
        .await;

    // Assert
    assert_eq!(200, response.status().as_u16());
    assert_ok!(response.json::<ResponseMessage>().await);
}

#[tokio::test]
async fn subscribe_persists_the_new_subscriber() {
    // Arrange
    let app = spawn_app().await;
    let topic = app.create_topic("Artificial Intelligence", "cs.AI", None).await;

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.email_server)
        .await;

    // Act
    app.post_subscriptions(&serde_json::json!({
        "email": "Ursula_Le_Guin@gmail.com",
        "topics": [{"code": "cs.AI", "schedule": "daily"}]
    }))
    .await;

    // Assert
    let saved = app.subscriber("ursula_le_guin@gmail.com").await;
    assert_eq!(saved.status, SubscriberStatus::Unverified);
    assert!(!saved.verified && !saved.subscribed);
    assert_eq!(saved.topics.get(&topic.topic_id), Some(&Schedule::Daily));
}

#[tokio::test]
async fn subscribe_returns_a_400_when_data_is_invalid() {
    // Arrange
    let app = spawn_app().await;
    app.create_topic("Artificial Intelligence", "cs.AI", None).await;
    let test_cases = vec![
        (serde_json::json!({}), "missing the email"),
        (serde_json::json!({"email": "definitely-not-an-email"}), "invalid email"),
        (
            serde_json::json!({"email": "ursula@gmail.com", "topics": [{"code": "cs.AI", "schedule": "monthly"}]}),
            "unknown schedule",
        ),
        (
            serde_json::json!({"email": "ursula@gmail.com", "topics": [{"code": "math.XX", "schedule": "daily"}]}),
            "unknown topic",
        ),
    ];

    for (invalid_body, error_message) in test_cases {
        // Act
        let response = app.post_subscriptions(&invalid_body).await;

        // Assert
        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request when the payload was {}.",
            error_message
        );
    }
    assert!(app.store.subscribers().is_empty());
}

#[tokio::test]
async fn subscribe_reports_an_unknown_topic_by_code() {
    // Arrange
    let app = spawn_app().await;

    // Act
    let response = app
        .post_subscriptions(&serde_json::json!({
            "email": "ursula@gmail.com",
            "topics": [{"code": "math.XX", "schedule": "daily"}]
        }))
        .await;

    // Assert
    assert_eq!(400, response.status().as_u16());
    let body: ResponseErrorMessage = response.json().await.unwrap();
    assert_eq!(body.error, "math.XX is not a known topic.");
}

#[tokio::test]
async fn subscribe_sends_a_confirmation_email_with_a_link() {
    // Arrange
    let app = spawn_app().await;

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    // Act
    app.post_subscriptions(&serde_json::json!({"email": "ursula_le_guin@gmail.com"}))
        .await;

    // Assert
    let email_request = &app.email_server.received_requests().await.unwrap()[0];
    let confirmation_links = app.get_confirmation_links(email_request);
    assert_eq!(confirmation_links.html, confirmation_links.plain_text);
    assert_eq!(confirmation_links.html.path(), "/subscriptions/confirm");
}

#[tokio::test]
async fn subscribing_twice_in_a_row_sends_a_single_email() {
    // Arrange
    let app = spawn_app().await;
    let body = serde_json::json!({"email": "ursula_le_guin@gmail.com"});

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    // Act
    let first = app.post_subscriptions(&body).await;
    let second = app.post_subscriptions(&body).await;

    // Assert
    assert_eq!(200, first.status().as_u16());
    assert_eq!(200, second.status().as_u16());
    assert_eq!(app.store.subscribers().len(), 1);
}

#[tokio::test]
async fn subscribe_succeeds_even_if_the_email_api_fails() {
    // Arrange
    let app = spawn_app().await;

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&app.email_server)
        .await;

    // Act
    let response = app
        .post_subscriptions(&serde_json::json!({"email": "ursula_le_guin@gmail.com"}))
        .await;

    // Assert
    assert_eq!(200, response.status().as_u16());
    let saved = app.subscriber("ursula_le_guin@gmail.com").await;
    assert!(saved.verification_sent_at.is_some());
}

#[tokio::test]
async fn subscribe_fails_if_the_store_is_unavailable() {
    // Arrange
    let app = spawn_app().await;
    app.store.set_unavailable(true);

    // Act
    let response = app
        .post_subscriptions(&serde_json::json!({"email": "ursula_le_guin@gmail.com"}))
        .await;

    // Assert
    assert_eq!(500, response.status().as_u16());
    let body: ResponseErrorMessage = response.json().await.unwrap();
    assert_eq!(body.error, "Something went wrong.");
}

#[tokio::test]
async fn subscribe_activates_immediately_when_verification_is_disabled() {
    // Arrange
    let app = spawn_app_with(|c| c.subscriptions.require_verification = false).await;

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    // Act
    let response = app
        .post_subscriptions(&serde_json::json!({"email": "ursula_le_guin@gmail.com"}))
        .await;

    // Assert
    assert_eq!(200, response.status().as_u16());
    let saved = app.subscriber("ursula_le_guin@gmail.com").await;
    assert_eq!(saved.status, SubscriberStatus::Subscribed);
    let email_request = &app.email_server.received_requests().await.unwrap()[0];
    let body: serde_json::Value = serde_json::from_slice(&email_request.body).unwrap();
    assert_eq!(body["Subject"], "Welcome to ArxivDigest");
}
