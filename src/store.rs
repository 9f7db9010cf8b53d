// Persistence of the lowest fare ever observed. The record lives in a single
// JSON file which is only ever replaced with a write-to-temp-then-rename, so a
// crash mid-write leaves the previous record intact. A missing or unreadable
// file means no fare has been seen yet.

use crate::fare_query::FareQuote;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to serialize best price: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestPriceRecord {
    pub price: Decimal,
    pub currency: String,
    pub departure_date: NaiveDate,
    pub return_date: NaiveDate,
    pub booking_url: String,
    pub found_at: DateTime<Utc>,
}

impl BestPriceRecord {
    pub fn from_quote(quote: &FareQuote, booking_url: String, found_at: DateTime<Utc>) -> Self {
        Self {
            price: quote.price,
            currency: quote.currency.clone(),
            departure_date: quote.departure_date,
            return_date: quote.return_date,
            booking_url,
            found_at,
        }
    }

    pub fn trip_length_days(&self) -> i64 {
        (self.return_date - self.departure_date).num_days()
    }
}

// Current best price, or Unset before the first observation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BestPrice {
    #[default]
    Unset,
    Known(BestPriceRecord),
}

impl BestPrice {
    pub fn record(&self) -> Option<&BestPriceRecord> {
        match self {
            BestPrice::Unset => None,
            BestPrice::Known(record) => Some(record),
        }
    }

    pub fn price(&self) -> Option<Decimal> {
        self.record().map(|r| r.price)
    }

    // Strictly lower wins; ties never count
    pub fn is_improved_by(&self, quote: &FareQuote) -> bool {
        match self {
            BestPrice::Unset => true,
            BestPrice::Known(record) => {
                if record.currency != quote.currency {
                    warn!(
                        stored = %record.currency,
                        quoted = %quote.currency,
                        "Comparing fares in different currencies"
                    );
                }
                quote.price < record.price
            }
        }
    }
}

impl std::fmt::Display for BestPrice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BestPrice::Unset => write!(f, "none yet"),
            BestPrice::Known(r) => write!(
                f,
                "{} {} ({} to {})",
                r.price, r.currency, r.departure_date, r.return_date
            ),
        }
    }
}

pub trait PriceStore: Send + Sync {
    // Never fails: absence or corruption yields BestPrice::Unset
    fn load(&self) -> BestPrice;

    fn save(&self, record: &BestPriceRecord) -> Result<(), PersistenceError>;
}

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "best_price.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(path: &Path, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

impl PriceStore for JsonFileStore {
    fn load(&self) -> BestPrice {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No best price file yet");
                return BestPrice::Unset;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Best price file unreadable, starting fresh");
                return BestPrice::Unset;
            }
        };

        match serde_json::from_str::<BestPriceRecord>(&contents) {
            Ok(record) if record.price > Decimal::ZERO => BestPrice::Known(record),
            Ok(record) => {
                warn!(price = %record.price, "Ignoring stored best price that is not positive");
                BestPrice::Unset
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Best price file corrupt, starting fresh");
                BestPrice::Unset
            }
        }
    }

    fn save(&self, record: &BestPriceRecord) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(record)?;
        let temp = self.temp_path();

        let mut file = File::create(&temp).map_err(|e| Self::io_error(&temp, e))?;
        let written = file.write_all(json.as_bytes()).and_then(|_| file.sync_all());
        drop(file);

        let result = written
            .map_err(|e| Self::io_error(&temp, e))
            .and_then(|_| fs::rename(&temp, &self.path).map_err(|e| Self::io_error(&self.path, e)));
        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&temp) {
                warn!(path = %temp.display(), error = %cleanup, "Failed to remove temporary best price file");
            }
            return Err(e);
        }
        debug!(path = %self.path.display(), price = %record.price, "Best price saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(price: Decimal) -> BestPriceRecord {
        BestPriceRecord {
            price,
            currency: "USD".to_string(),
            departure_date: date(2025, 3, 10),
            return_date: date(2025, 3, 24),
            booking_url: "https://www.google.com/travel/flights?q=AUS+SFO".to_string(),
            found_at: Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap(),
        }
    }

    fn quote(price: Decimal) -> FareQuote {
        FareQuote {
            departure_date: date(2025, 3, 11),
            return_date: date(2025, 3, 25),
            price,
            currency: "USD".to_string(),
            nonstop: true,
        }
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("best_price.json"));
        let saved = record(Decimal::new(43015, 2));

        store.save(&saved).unwrap();
        assert_eq!(store.load(), BestPrice::Known(saved));
        // Temp file is renamed away
        assert!(!dir.path().join("best_price.json.tmp").exists());
    }

    #[test]
    fn test_save_replaces_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("best_price.json"));

        store.save(&record(Decimal::new(450, 0))).unwrap();
        store.save(&record(Decimal::new(430, 0))).unwrap();
        assert_eq!(store.load().price(), Some(Decimal::new(430, 0)));
    }

    #[test]
    fn test_persisted_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best_price.json");
        JsonFileStore::new(&path).save(&record(Decimal::new(430, 0))).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        for field in ["price", "currency", "departure_date", "return_date", "booking_url", "found_at"] {
            assert!(value.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(value["departure_date"], "2025-03-10");
    }

    #[test]
    fn test_missing_file_loads_unset() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert_eq!(store.load(), BestPrice::Unset);
    }

    #[test]
    fn test_corrupt_file_loads_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best_price.json");
        // What a float-infinity sentinel written by other tools looks like
        fs::write(&path, r#"{"price": Infinity}"#).unwrap();
        assert_eq!(JsonFileStore::new(&path).load(), BestPrice::Unset);

        fs::write(&path, "{\"price\": 12").unwrap();
        assert_eq!(JsonFileStore::new(&path).load(), BestPrice::Unset);
    }

    #[test]
    fn test_numeric_price_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best_price.json");
        fs::write(
            &path,
            r#"{"price": 399.5, "currency": "USD", "departure_date": "2025-03-10",
                "return_date": "2025-03-24", "booking_url": "x", "found_at": "2025-03-01T08:30:00Z"}"#,
        )
        .unwrap();
        assert_eq!(JsonFileStore::new(&path).load().price(), Some(Decimal::new(3995, 1)));
    }

    #[test]
    fn test_non_positive_stored_price_is_unset() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("best_price.json"));
        store.save(&record(Decimal::ZERO)).unwrap();
        assert_eq!(store.load(), BestPrice::Unset);
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nope").join("best_price.json"));
        assert!(matches!(
            store.save(&record(Decimal::new(1, 0))),
            Err(PersistenceError::Io { .. })
        ));
    }

    #[test]
    fn test_failed_save_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory where the record should go makes the rename fail
        let target = dir.path().join("best_price.json");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), "x").unwrap();

        let store = JsonFileStore::new(&target);
        assert!(matches!(
            store.save(&record(Decimal::new(430, 0))),
            Err(PersistenceError::Io { .. })
        ));
        assert!(!dir.path().join("best_price.json.tmp").exists());
        assert!(target.join("keep").exists());
    }

    #[test]
    fn test_improvement_is_strict() {
        let best = BestPrice::Known(record(Decimal::new(450, 0)));
        assert!(best.is_improved_by(&quote(Decimal::new(44999, 2))));
        assert!(!best.is_improved_by(&quote(Decimal::new(450, 0))));
        assert!(!best.is_improved_by(&quote(Decimal::new(451, 0))));
    }

    #[test]
    fn test_any_quote_improves_unset() {
        assert!(BestPrice::Unset.is_improved_by(&quote(Decimal::new(99999, 0))));
    }

    #[test]
    fn test_trip_length() {
        assert_eq!(record(Decimal::ONE).trip_length_days(), 14);
    }
}
