use serde::{Deserialize, Serialize};

// Data structures for the Amadeus JSON responses. Only the fields the
// watcher reads are modelled; everything else is ignored by serde.

#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FlightOffersResponse {
    #[serde(default)]
    pub data: Vec<FlightOffer>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FlightOffer {
    #[serde(default)]
    pub id: Option<String>,
    pub price: OfferPrice,
    #[serde(default)]
    pub itineraries: Vec<Itinerary>,
}

impl FlightOffer {
    // Nonstop means every leg of the round trip is a single segment
    pub fn is_nonstop(&self) -> bool {
        !self.itineraries.is_empty() && self.itineraries.iter().all(|i| i.segments.len() == 1)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OfferPrice {
    pub currency: String,
    pub total: String,
    #[serde(rename = "grandTotal", default)]
    pub grand_total: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Itinerary {
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Segment {
    #[serde(rename = "carrierCode", default)]
    pub carrier_code: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
}

// Error payload: {"errors": [{"status": 400, "code": 477, "title": "...", "detail": "..."}]}
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub code: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ErrorResponse {
    // Human readable summary of the first error, if the body had one
    pub fn summary(&self) -> Option<String> {
        let first = self.errors.first()?;
        match (&first.title, &first.detail) {
            (Some(title), Some(detail)) => Some(format!("{}: {}", title, detail)),
            (Some(text), None) | (None, Some(text)) => Some(text.clone()),
            (None, None) => first.code.map(|code| format!("error code {}", code)),
        }
    }
}
