pub mod clock;
pub mod configuration;
pub mod dispatch;
pub mod domain;
pub mod email_client;
pub mod ledger;
pub mod lifecycle;
pub mod renderer;
pub mod resolver;
pub mod routes;
pub mod startup;
pub mod store;
pub mod telemetry;
pub mod token_service;
pub mod utils;

#[cfg(test)]
mod test_helpers;
