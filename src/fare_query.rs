// Flight-offers search: one request per candidate departure date

use crate::auth::AccessToken;
use crate::config::Route;
use crate::supplier::{ErrorResponse, FlightOffer, FlightOffersResponse};
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

pub const FLIGHT_OFFERS_PATH: &str = "/v2/shopping/flight-offers";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Unauthorized: {status} - {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("Request rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl QueryError {
    // Rate limits, server faults and transport failures may succeed later;
    // rejected requests and undecodable bodies will not
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::RateLimited { .. } | QueryError::Server { .. } | QueryError::Network(_)
        )
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, QueryError::Unauthorized { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FareSearch {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: NaiveDate,
}

impl FareSearch {
    // None when the return date falls outside the calendar chrono supports
    pub fn round_trip(route: &Route, departure_date: NaiveDate, trip_duration_days: u32) -> Option<Self> {
        let return_date = departure_date.checked_add_days(Days::new(u64::from(trip_duration_days)))?;
        Some(Self {
            origin: route.origin.clone(),
            destination: route.destination.clone(),
            departure_date,
            return_date,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FareQuote {
    pub departure_date: NaiveDate,
    pub return_date: NaiveDate,
    pub price: Decimal,
    pub currency: String,
    pub nonstop: bool,
}

#[async_trait]
pub trait FareSource: Send + Sync {
    // Ok(None) means the provider had no offers for these dates
    async fn search(
        &self,
        token: &AccessToken,
        search: &FareSearch,
    ) -> Result<Option<FareQuote>, QueryError>;
}

// Pick the cheapest offer, preferring nonstop itineraries when the provider
// mixes them in. Offers whose total is missing, unparsable or not positive
// are skipped.
pub fn cheapest_offer(search: &FareSearch, offers: &[FlightOffer]) -> Option<FareQuote> {
    let priced: Vec<(Decimal, &FlightOffer)> = offers
        .iter()
        .filter_map(|offer| match Decimal::from_str(offer.price.total.trim()) {
            Ok(price) if price > Decimal::ZERO => Some((price, offer)),
            _ => {
                warn!(
                    offer_id = offer.id.as_deref().unwrap_or("?"),
                    total = %offer.price.total,
                    "Skipping offer with unusable price"
                );
                None
            }
        })
        .collect();

    let any_nonstop = priced.iter().any(|(_, offer)| offer.is_nonstop());

    priced
        .into_iter()
        .filter(|(_, offer)| !any_nonstop || offer.is_nonstop())
        .min_by(|a, b| a.0.cmp(&b.0))
        .map(|(price, offer)| FareQuote {
            departure_date: search.departure_date,
            return_date: search.return_date,
            price,
            currency: offer.price.currency.clone(),
            nonstop: offer.is_nonstop(),
        })
}

pub struct AmadeusFareClient {
    client: Client,
    search_url: String,
    max_offers: u32,
}

impl AmadeusFareClient {
    pub fn new(client: Client, base_url: &str, max_offers: u32) -> Self {
        Self {
            client,
            search_url: format!("{}{}", base_url.trim_end_matches('/'), FLIGHT_OFFERS_PATH),
            max_offers,
        }
    }

    fn query_params(&self, search: &FareSearch) -> Vec<(&'static str, String)> {
        vec![
            ("originLocationCode", search.origin.clone()),
            ("destinationLocationCode", search.destination.clone()),
            ("departureDate", search.departure_date.format(DATE_FORMAT).to_string()),
            ("returnDate", search.return_date.format(DATE_FORMAT).to_string()),
            ("adults", "1".to_string()),
            ("nonStop", "true".to_string()),
            ("travelClass", "ECONOMY".to_string()),
            ("max", self.max_offers.to_string()),
        ]
    }
}

#[async_trait]
impl FareSource for AmadeusFareClient {
    async fn search(
        &self,
        token: &AccessToken,
        search: &FareSearch,
    ) -> Result<Option<FareQuote>, QueryError> {
        let response = self
            .client
            .get(&self.search_url)
            .bearer_auth(token.secret())
            .query(&self.query_params(search))
            .send()
            .await
            .map_err(|e| QueryError::Network(e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_failure(status, retry_after, &body));
        }

        let offers: FlightOffersResponse =
            serde_json::from_str(&body).map_err(|e| QueryError::Malformed(e.to_string()))?;
        debug!(
            departure = %search.departure_date,
            offers = offers.data.len(),
            "Flight offers received"
        );

        Ok(cheapest_offer(search, &offers.data))
    }
}

pub fn classify_failure(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> QueryError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.summary())
        .unwrap_or_else(|| body.to_string());
    let code = status.as_u16();

    match code {
        401 => QueryError::Unauthorized { status: code, message },
        429 => QueryError::RateLimited { retry_after_secs },
        408 | 500..=599 => QueryError::Server { status: code, message },
        _ => QueryError::Rejected { status: code, message },
    }
}
