use super::subscription_error;
use crate::domain::SubscriberEmail;
use crate::lifecycle::{SubscriptionService, TopicSubscription, VerificationOutcome};
use crate::utils::{ResponseMessage, e400};
use actix_web::http::header::ContentType;
use actix_web::{HttpResponse, post, web};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct SubscribeData {
    email: String,
    #[serde(default)]
    topics: Vec<TopicSubscription>,
}

pub(super) fn outcome_message(outcome: VerificationOutcome) -> &'static str {
    match outcome {
        VerificationOutcome::VerificationSent | VerificationOutcome::CooldownActive => {
            "Thanks for subscribing! Check your inbox to confirm your subscription."
        }
        VerificationOutcome::AlreadySubscribed => "You are already subscribed.",
        VerificationOutcome::Subscribed => "You are now subscribed.",
    }
}

#[post("/subscriptions")]
#[tracing::instrument(
    name = "Subscribe request",
    skip_all,
    fields(subscriber_email = %body.email)
)]
pub async fn post(
    body: web::Json<SubscribeData>,
    service: web::Data<SubscriptionService>,
) -> Result<HttpResponse, actix_web::Error> {
    let SubscribeData { email, topics } = body.into_inner();
    let email = SubscriberEmail::parse(email).map_err(e400)?;
    let outcome = service
        .subscribe(email, &topics)
        .await
        .map_err(subscription_error)?;

    Ok(HttpResponse::Ok()
        .content_type(ContentType::json())
        .json(ResponseMessage::from(outcome_message(outcome))))
}
