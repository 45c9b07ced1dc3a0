use super::{outcome_message, subscription_error};
use crate::domain::SubscriberEmail;
use crate::lifecycle::SubscriptionService;
use crate::utils::{ResponseMessage, e400};
use actix_web::http::header::ContentType;
use actix_web::{HttpResponse, post, web};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct ResendData {
    email: String,
}

#[post("/subscriptions/resend")]
#[tracing::instrument(name = "Resend confirmation request", skip_all, fields(subscriber_email = %body.email))]
pub async fn post(
    body: web::Json<ResendData>,
    service: web::Data<SubscriptionService>,
) -> Result<HttpResponse, actix_web::Error> {
    let email = SubscriberEmail::parse(body.into_inner().email).map_err(e400)?;
    let outcome = service.resend(&email).await.map_err(subscription_error)?;

    Ok(HttpResponse::Ok()
        .content_type(ContentType::json())
        .json(ResponseMessage::from(outcome_message(outcome))))
}
