mod index;

pub mod confirm;
pub mod resend;
pub mod unsubscribe;

pub use index::*;

use crate::lifecycle::SubscriptionError;
use crate::utils::{e400, e404, e409, e500};

fn subscription_error(e: SubscriptionError) -> actix_web::Error {
    match e {
        SubscriptionError::UnknownTopic(_) | SubscriptionError::ExpiredToken => e400(e),
        SubscriptionError::UnknownToken | SubscriptionError::UnknownSubscriber => e404(e),
        SubscriptionError::NotSubscribed => e409(e),
        SubscriptionError::Store(_) => e500(e),
    }
}
