// Email notification of a new best fare

use crate::config::{EmailSettings, Route};
use crate::fare_query::DATE_FORMAT;
use crate::store::{BestPrice, BestPriceRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const GOOGLE_FLIGHTS_URL: &str = "https://www.google.com/travel/flights";
pub const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("SMTP transport setup failed: {0}")]
    Transport(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub body: String,
}

// Google Flights search deep link with the route and both dates in `q`
pub fn booking_link(route: &Route, departure: NaiveDate, return_date: NaiveDate) -> String {
    let query = format!(
        "Flights from {} to {} on {} through {} nonstop",
        route.origin,
        route.destination,
        departure.format(DATE_FORMAT),
        return_date.format(DATE_FORMAT)
    );
    Url::parse_with_params(GOOGLE_FLIGHTS_URL, &[("q", query.as_str()), ("hl", "en")])
        .map(String::from)
        .unwrap_or_else(|_| GOOGLE_FLIGHTS_URL.to_string())
}

pub fn kayak_link(route: &Route, departure: NaiveDate, return_date: NaiveDate) -> String {
    format!(
        "https://www.kayak.com/flights/{}-{}/{}/{}?sort=price_a&stops=0",
        route.origin,
        route.destination,
        departure.format(DATE_FORMAT),
        return_date.format(DATE_FORMAT)
    )
}

pub fn compose(route: &Route, record: &BestPriceRecord, previous: &BestPrice) -> EmailMessage {
    let subject = format!(
        "New Cheapest Flight to {}! Only {:.2} {}",
        route.destination, record.price, record.currency
    );

    let savings = match previous.record() {
        Some(prev) if prev.currency == record.currency => format!(
            "Savings: {:.2} {} (previous best {:.2} {})\n",
            prev.price - record.price,
            record.currency,
            prev.price,
            prev.currency
        ),
        Some(prev) => format!("Previous best: {:.2} {}\n", prev.price, prev.currency),
        None => String::new(),
    };

    let body = format!(
        "A new cheapest nonstop round trip has been found!\n\
         \n\
         Route: {route}\n\
         Price: {price:.2} {currency}\n\
         {savings}\
         Departure Date: {departure}\n\
         Return Date: {return_date}\n\
         Trip Length: {days} days\n\
         \n\
         Book now on Google Flights:\n\
         {booking}\n\
         \n\
         Compare on Kayak:\n\
         {kayak}\n\
         \n\
         Prices change quickly, verify the fare before booking.\n",
        route = route,
        price = record.price,
        currency = record.currency,
        savings = savings,
        departure = record.departure_date.format(DATE_FORMAT),
        return_date = record.return_date.format(DATE_FORMAT),
        days = record.trip_length_days(),
        booking = record.booking_url,
        kayak = kayak_link(route, record.departure_date, record.return_date),
    );

    EmailMessage { subject, body }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    // TLS from the first byte, as on port 465
    ImplicitTls,
    // Plain connection upgraded with STARTTLS, as on the submission port 587
    StartTls,
}

impl SmtpSecurity {
    pub fn for_port(port: u16) -> Self {
        match port {
            25 | 587 => SmtpSecurity::StartTls,
            _ => SmtpSecurity::ImplicitTls,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, record: &BestPriceRecord, previous: &BestPrice) -> Result<(), NotificationError>;
}

pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    security: SmtpSecurity,
    sender: Mailbox,
    receiver: Mailbox,
    route: Route,
}

impl EmailNotifier {
    // Authenticated submission with the sender's app password; the TLS mode
    // follows the port
    pub fn new(settings: &EmailSettings, route: Route) -> Result<Self, NotificationError> {
        let security = SmtpSecurity::for_port(settings.smtp_port);
        let builder = match security {
            SmtpSecurity::ImplicitTls => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.smtp_host),
            SmtpSecurity::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host),
        };
        let transport = builder
            .map_err(|e| NotificationError::Transport(e.to_string()))?
            .port(settings.smtp_port)
            .credentials(Credentials::new(
                settings.sender.email.to_string(),
                settings.app_password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        info!(host = %settings.smtp_host, port = settings.smtp_port, security = ?security, "SMTP transport configured");
        Ok(Self {
            transport,
            security,
            sender: settings.sender.clone(),
            receiver: settings.receiver.clone(),
            route,
        })
    }

    pub fn security(&self) -> SmtpSecurity {
        self.security
    }

    fn build_message(&self, email: EmailMessage) -> Result<Message, NotificationError> {
        Message::builder()
            .from(self.sender.clone())
            .to(self.receiver.clone())
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .map_err(|e| NotificationError::Build(e.to_string()))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, record: &BestPriceRecord, previous: &BestPrice) -> Result<(), NotificationError> {
        let message = self.build_message(compose(&self.route, record, previous))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;

        info!(receiver = %self.receiver, price = %record.price, "Email notification sent");
        Ok(())
    }
}
