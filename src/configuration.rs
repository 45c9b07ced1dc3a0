use crate::domain::SubscriberEmail;
use crate::email_client::EmailClient;
use chrono::Duration as ChronoDuration;
use secrecy::{ExposeSecret, Secret};
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::time::Duration;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub dispatch: DispatchSettings,
    pub email_client: EmailClientSettings,
    pub subscriptions: SubscriptionSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub base_url: String,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub require_ssl: bool,
}

impl DatabaseSettings {
    pub fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        self.without_db()
            .database(&self.database_name)
            .log_statements(log::LevelFilter::Trace)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    pub authorization_token: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

impl EmailClientSettings {
    pub fn client(self) -> Result<EmailClient, anyhow::Error> {
        let sender_email = self.sender().map_err(anyhow::Error::msg)?;
        let timeout = self.timeout();

        EmailClient::new(
            self.base_url,
            sender_email,
            self.authorization_token,
            timeout,
        )
    }

    pub fn sender(&self) -> Result<SubscriberEmail, String> {
        SubscriberEmail::parse(self.sender_email.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct SubscriptionSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub confirmation_expiry_days: i64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub verification_cooldown_seconds: i64,
    pub require_verification: bool,
}

impl SubscriptionSettings {
    pub fn confirmation_expiry(&self) -> ChronoDuration {
        ChronoDuration::days(self.confirmation_expiry_days)
    }

    pub fn verification_cooldown(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.verification_cooldown_seconds)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DispatchSettings {
    /// Zero or negative sends every recipient of a topic in one batch.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub batch_size: i64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub batch_wait_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub topic_concurrency: usize,
    #[serde(default)]
    pub run_timeout_seconds: Option<u64>,
    pub site_base_url: String,
}

impl DispatchSettings {
    pub fn batch_wait(&self) -> Duration {
        Duration::from_millis(self.batch_wait_milliseconds)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("Failed to determine the current directory: {e}")))?;
    let configuration_directory = base_path.join("configuration");

    // Detect the running environment.
    // Default to `local` if unspecified.
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(environment_filename),
        ))
        // Add in settings from environment variables (with a prefix of APP and '__' as separator)
        // E.g. `APP_APPLICATION__PORT=5001 would set `Settings.application.port`
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
