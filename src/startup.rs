use crate::clock::SystemClock;
use crate::configuration::{DatabaseSettings, Settings};
use crate::lifecycle::{EventDispatcher, MailNotifier, SubscriptionPolicy, SubscriptionService};
use crate::routes::{health_check, subscriptions, topics};
use crate::store::{PgStore, Store};
use crate::token_service::TokenService;
use actix_web::dev::Server;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub async fn build(configuration: Settings) -> Result<Self, anyhow::Error> {
        let connection_pool = get_connection_pool(&configuration.database);
        let store: Arc<dyn Store> = Arc::new(PgStore::new(connection_pool));

        Self::build_with_store(configuration, store).await
    }

    /// Builds the server on top of an already constructed store.
    pub async fn build_with_store(
        configuration: Settings,
        store: Arc<dyn Store>,
    ) -> Result<Self, anyhow::Error> {
        let email_client = Arc::new(configuration.email_client.clone().client()?);
        let notifier = MailNotifier::new(email_client, configuration.application.base_url.clone());
        let subscription_service = SubscriptionService::new(
            store.clone(),
            TokenService::new(),
            Arc::new(SystemClock),
            SubscriptionPolicy::from(&configuration.subscriptions),
            EventDispatcher::new().with_listener(Arc::new(notifier)),
        );

        let address = format!(
            "{}:{}",
            configuration.application.host, configuration.application.port
        );
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();
        let server = run(listener, store, subscription_service)?;

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

pub fn get_connection_pool(configuration: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(configuration.connect_options())
}

fn run(
    listener: TcpListener,
    store: Arc<dyn Store>,
    subscription_service: SubscriptionService,
) -> Result<Server, anyhow::Error> {
    let store: Data<dyn Store> = Data::from(store);
    let subscription_service = Data::new(subscription_service);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .service(health_check::get)
            .service(topics::get)
            .service(subscriptions::post)
            .service(subscriptions::resend::post)
            .service(subscriptions::confirm::get)
            .service(subscriptions::unsubscribe::get)
            .service(subscriptions::unsubscribe::post)
            .app_data(store.clone())
            .app_data(subscription_service.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
