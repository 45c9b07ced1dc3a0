use crate::helpers::spawn_app;
use arxiv_digest::store::Store;
use chrono::{Duration, Utc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn resending_to_an_unknown_email_returns_a_404() {
    // Arrange
    let app = spawn_app().await;

    // Act
    let response = app
        .post_resend(&serde_json::json!({"email": "nobody@gmail.com"}))
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn resending_within_the_cooldown_sends_nothing() {
    // Arrange
    let app = spawn_app().await;
    app.create_unconfirmed_subscriber("ursula@gmail.com").await;
    let token_before = app.subscriber("ursula@gmail.com").await.confirmation_token;
    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.email_server)
        .await;

    // Act
    let response = app
        .post_resend(&serde_json::json!({"email": "ursula@gmail.com"}))
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let token_after = app.subscriber("ursula@gmail.com").await.confirmation_token;
    assert_eq!(token_before, token_after);
}

#[tokio::test]
async fn resending_after_the_cooldown_sends_a_new_link() {
    // Arrange
    let app = spawn_app().await;
    let old_links = app.create_unconfirmed_subscriber("ursula@gmail.com").await;
    let mut subscriber = app.subscriber("ursula@gmail.com").await;
    subscriber.verification_sent_at = Some(Utc::now() - Duration::minutes(6));
    app.store.update_subscriber(&subscriber).await.unwrap();
    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    // Act
    let response = app
        .post_resend(&serde_json::json!({"email": "ursula@gmail.com"}))
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let email_request = app
        .email_server
        .received_requests()
        .await
        .unwrap()
        .pop()
        .unwrap();
    let new_links = app.get_confirmation_links(&email_request);
    assert_ne!(old_links.html, new_links.html);
    let stale = app.api_client.get(old_links.html).send().await.unwrap();
    assert_eq!(stale.status().as_u16(), 404);
}
