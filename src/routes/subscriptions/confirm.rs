use super::subscription_error;
use crate::lifecycle::SubscriptionService;
use crate::utils::ResponseMessage;
use actix_web::http::header::ContentType;
use actix_web::{HttpResponse, get, web};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct Parameters {
    token: String,
}

#[get("/subscriptions/confirm")]
#[tracing::instrument(name = "Confirm a pending subscriber", skip_all)]
pub async fn get(
    parameters: web::Query<Parameters>,
    service: web::Data<SubscriptionService>,
) -> Result<HttpResponse, actix_web::Error> {
    service
        .confirm(&parameters.token)
        .await
        .map_err(subscription_error)?;

    Ok(HttpResponse::Ok()
        .content_type(ContentType::json())
        .json(ResponseMessage::from("Your subscription is confirmed.")))
}
