mod confirmation_token;
mod newsletter;
mod paper;
mod schedule;
mod subscriber;
mod subscriber_email;
mod topic;

pub use confirmation_token::ConfirmationToken;
pub use newsletter::{Newsletter, RenderedNewsletter, UNSUBSCRIBE_URL_PLACEHOLDER};
pub use paper::Paper;
pub use schedule::Schedule;
pub use subscriber::{Subscriber, SubscriberStatus, unsubscribe_url};
pub use subscriber_email::SubscriberEmail;
pub use topic::{Topic, TopicCode, TopicTree, TopicTreeError};
