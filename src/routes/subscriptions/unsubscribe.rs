use super::subscription_error;
use crate::domain::SubscriberStatus;
use crate::lifecycle::{SubscriptionError, SubscriptionService};
use crate::utils::ResponseMessage;
use actix_web::http::header::ContentType;
use actix_web::{HttpResponse, get, post, web};
use uuid::Uuid;

/// Landing page of the link in every email. Only a POST unsubscribes.
#[get("/subscriptions/{subscriber_id}/unsubscribe")]
#[tracing::instrument(name = "Unsubscribe page", skip_all, fields(subscriber_id = %path.0))]
pub async fn get(
    path: web::Path<(Uuid,)>,
    service: web::Data<SubscriptionService>,
) -> Result<HttpResponse, actix_web::Error> {
    let subscriber = service
        .subscriber(path.into_inner().0)
        .await
        .map_err(subscription_error)?;
    if subscriber.status != SubscriberStatus::Subscribed {
        return Err(subscription_error(SubscriptionError::NotSubscribed));
    }

    Ok(HttpResponse::Ok()
        .content_type(ContentType::json())
        .json(ResponseMessage::from(
            "Send a POST request to this address to stop receiving ArxivDigest emails.",
        )))
}

#[post("/subscriptions/{subscriber_id}/unsubscribe")]
#[tracing::instrument(name = "Unsubscribe request", skip_all, fields(subscriber_id = %path.0))]
pub async fn post(
    path: web::Path<(Uuid,)>,
    service: web::Data<SubscriptionService>,
) -> Result<HttpResponse, actix_web::Error> {
    let subscriber_id = path.into_inner().0;
    service
        .unsubscribe(subscriber_id)
        .await
        .map_err(subscription_error)?;

    Ok(HttpResponse::Ok()
        .content_type(ContentType::json())
        .json(ResponseMessage::from("You have been unsubscribed.")))
}
