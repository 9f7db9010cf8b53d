// Cheapest nonstop round-trip fare watcher

pub mod auth;
pub mod clock;
pub mod config;
pub mod fare_query;
pub mod notifier;
pub mod poll_loop;
pub mod store;
pub mod supplier;
pub mod telemetry;

// Re-export key types for convenience
pub use auth::{AccessToken, AmadeusAuth, AuthError, TokenProvider};
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, Route, SearchSettings, WatchConfig};
pub use fare_query::{AmadeusFareClient, FareQuote, FareSearch, FareSource, QueryError};
pub use notifier::{EmailNotifier, NotificationError, Notifier};
pub use poll_loop::{CycleOutcome, CycleReport, FareWatcher, WatchState, WatcherParts};
pub use store::{BestPrice, BestPriceRecord, JsonFileStore, PersistenceError, PriceStore};
