// The polling loop: scan the departure window, keep the cheapest quote of
// the scan, and persist then announce it when it beats the best price seen
// so far. All I/O goes through the capability traits so a cycle can be
// driven entirely in memory.

use crate::auth::{AuthError, TokenProvider};
use crate::clock::Clock;
use crate::config::{Route, SearchSettings};
use crate::fare_query::{FareQuote, FareSearch, FareSource, QueryError};
use crate::notifier::{booking_link, Notifier};
use crate::store::{BestPrice, BestPriceRecord, PriceStore};
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

// A second authentication failure in a row abandons the cycle
pub const MAX_CONSECUTIVE_AUTH_FAILURES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Init,
    Authenticating,
    Scanning,
    Sleeping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    NoQuotes,
    NoImprovement,
    NewBest {
        price: Decimal,
        persisted: bool,
        notified: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub dates_checked: usize,
    pub quotes_found: usize,
    pub failed_queries: usize,
    pub cheapest: Option<FareQuote>,
    pub aborted: Option<AuthError>,
    pub outcome: CycleOutcome,
}

impl Default for CycleReport {
    fn default() -> Self {
        Self {
            dates_checked: 0,
            quotes_found: 0,
            failed_queries: 0,
            cheapest: None,
            aborted: None,
            outcome: CycleOutcome::NoQuotes,
        }
    }
}

enum DateOutcome {
    Quote(FareQuote),
    NoOffers,
    Failed(QueryError),
}

// The I/O capabilities the watcher drives
pub struct WatcherParts {
    pub auth: Box<dyn TokenProvider>,
    pub fares: Box<dyn FareSource>,
    pub store: Box<dyn PriceStore>,
    pub notifier: Box<dyn Notifier>,
    pub clock: Box<dyn Clock>,
}

pub struct FareWatcher {
    route: Route,
    settings: SearchSettings,
    auth: Box<dyn TokenProvider>,
    fares: Box<dyn FareSource>,
    store: Box<dyn PriceStore>,
    notifier: Box<dyn Notifier>,
    clock: Box<dyn Clock>,
    best: BestPrice,
    state: WatchState,
}

// today+1 ..= today+within_days, one entry per day, stopping at the end of
// the representable calendar
pub fn candidate_dates(today: NaiveDate, within_days: u32) -> Vec<NaiveDate> {
    (1..=within_days)
        .map_while(|offset| today.checked_add_days(Days::new(u64::from(offset))))
        .collect()
}

impl FareWatcher {
    // Loads the persisted best price; a missing record starts the watcher unset
    pub fn new(route: Route, settings: SearchSettings, parts: WatcherParts) -> Self {
        let best = parts.store.load();
        info!(route = %route, best = %best, "Loaded best price");

        Self {
            route,
            settings,
            auth: parts.auth,
            fares: parts.fares,
            store: parts.store,
            notifier: parts.notifier,
            clock: parts.clock,
            best,
            state: WatchState::Init,
        }
    }

    pub fn best(&self) -> &BestPrice {
        &self.best
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    // Startup authentication; failure here is fatal to the process
    pub async fn authenticate(&mut self) -> Result<(), AuthError> {
        self.state = WatchState::Authenticating;
        self.auth.access_token().await?;
        Ok(())
    }

    // Run forever; only process termination stops it
    pub async fn run(&mut self) {
        self.run_cycles(None).await;
    }

    // Run `limit` cycles (or forever with None), sleeping the check interval
    // between them. Returns the number of cycles completed.
    pub async fn run_cycles(&mut self, limit: Option<u64>) -> u64 {
        let mut completed = 0;
        loop {
            self.run_cycle().await;
            completed += 1;
            if limit.is_some_and(|limit| completed >= limit) {
                return completed;
            }

            self.state = WatchState::Sleeping;
            info!(
                minutes = self.settings.check_interval.as_secs() / 60,
                "Waiting until the next check"
            );
            self.clock.sleep(self.settings.check_interval).await;
        }
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        self.state = WatchState::Scanning;
        let dates = candidate_dates(self.clock.today(), self.settings.search_within_days);
        info!(
            route = %self.route,
            best = %self.best,
            dates = dates.len(),
            trip_days = self.settings.trip_duration_days,
            "Running new check"
        );

        let mut report = CycleReport::default();
        let mut auth_failures = 0;

        for departure in dates {
            let Some(search) = FareSearch::round_trip(&self.route, departure, self.settings.trip_duration_days)
            else {
                warn!(departure = %departure, "Return date out of range, skipping date");
                continue;
            };
            info!(
                departure = %search.departure_date,
                return_date = %search.return_date,
                "Searching"
            );

            let outcome = self.query_date(&search, &mut auth_failures).await;
            report.dates_checked += 1;

            match outcome {
                Ok(DateOutcome::Quote(quote)) => {
                    report.quotes_found += 1;
                    let cheaper = report.cheapest.as_ref().map_or(true, |c| quote.price < c.price);
                    if cheaper {
                        info!(
                            price = %quote.price,
                            currency = %quote.currency,
                            departure = %quote.departure_date,
                            "New best price in this scan"
                        );
                        report.cheapest = Some(quote);
                    }
                }
                Ok(DateOutcome::NoOffers) => {
                    debug!(departure = %search.departure_date, "No offers");
                }
                Ok(DateOutcome::Failed(e)) => {
                    report.failed_queries += 1;
                    warn!(
                        departure = %search.departure_date,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Fare query failed, skipping date"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Authentication failed twice in a row, abandoning this cycle");
                    report.aborted = Some(e);
                    break;
                }
            }

            self.clock.sleep(self.settings.request_delay).await;
        }

        report.outcome = match report.cheapest.clone() {
            None => CycleOutcome::NoQuotes,
            Some(quote) if self.best.is_improved_by(&quote) => self.record_improvement(&quote).await,
            Some(_) => CycleOutcome::NoImprovement,
        };

        info!(
            dates_checked = report.dates_checked,
            quotes_found = report.quotes_found,
            failed_queries = report.failed_queries,
            aborted = report.aborted.is_some(),
            cheapest = ?report.cheapest.as_ref().map(|q| q.price),
            best = %self.best,
            "Scan complete"
        );
        report
    }

    // Query one date, re-authenticating once on an auth failure. The retry
    // waits the request delay like any other outbound call. Err means two
    // consecutive auth failures and the cycle must stop.
    async fn query_date(
        &mut self,
        search: &FareSearch,
        auth_failures: &mut u32,
    ) -> Result<DateOutcome, AuthError> {
        loop {
            let token = match self.auth.access_token().await {
                Ok(token) => token,
                Err(e) => {
                    self.note_auth_failure(auth_failures, &e)?;
                    self.clock.sleep(self.settings.request_delay).await;
                    continue;
                }
            };

            let result = self.fares.search(&token, search).await;
            if let Err(QueryError::Unauthorized { status, message }) = &result {
                let e = AuthError::Rejected {
                    status: *status,
                    body: message.clone(),
                };
                self.note_auth_failure(auth_failures, &e)?;
                self.clock.sleep(self.settings.request_delay).await;
                continue;
            }

            *auth_failures = 0;
            return Ok(match result {
                Ok(Some(quote)) => DateOutcome::Quote(quote),
                Ok(None) => DateOutcome::NoOffers,
                Err(e) => DateOutcome::Failed(e),
            });
        }
    }

    fn note_auth_failure(&mut self, auth_failures: &mut u32, e: &AuthError) -> Result<(), AuthError> {
        *auth_failures += 1;
        self.auth.invalidate();
        if *auth_failures >= MAX_CONSECUTIVE_AUTH_FAILURES {
            return Err(e.clone());
        }
        self.state = WatchState::Authenticating;
        warn!(error = %e, "Authentication failed, re-authenticating");
        Ok(())
    }

    // Persist first, then notify: a failed notification never loses a price
    async fn record_improvement(&mut self, quote: &FareQuote) -> CycleOutcome {
        let booking_url = booking_link(&self.route, quote.departure_date, quote.return_date);
        let record = BestPriceRecord::from_quote(quote, booking_url, self.clock.now());
        info!(
            price = %record.price,
            currency = %record.currency,
            departure = %record.departure_date,
            return_date = %record.return_date,
            previous = %self.best,
            "New all-time best price found"
        );

        let persisted = match self.store.save(&record) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    error = %e,
                    price = %record.price,
                    "FAILED TO PERSIST NEW BEST PRICE, it will be lost on restart"
                );
                false
            }
        };

        let previous = std::mem::replace(&mut self.best, BestPrice::Known(record.clone()));

        let notified = match self.notifier.notify(&record, &previous).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, price = %record.price, "Notification failed");
                false
            }
        };

        CycleOutcome::NewBest {
            price: record.price,
            persisted,
            notified,
        }
    }
}

// In-memory stand-ins for every capability, shared with the tests through Arcs
#[cfg(test)]
pub mod fakes {
    use super::*;
    use crate::auth::AccessToken;
    use crate::notifier::NotificationError;
    use crate::store::PersistenceError;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    pub fn valid_token() -> AccessToken {
        AccessToken::new("fake-token", Utc::now() + chrono::Duration::minutes(30))
    }

    #[derive(Default)]
    pub struct ScriptedAuth {
        script: VecDeque<Result<AccessToken, AuthError>>,
        pub calls: Arc<AtomicUsize>,
        pub invalidations: Arc<AtomicUsize>,
    }

    impl ScriptedAuth {
        // Responses are consumed in order, then every call succeeds
        pub fn with_script(script: Vec<Result<AccessToken, AuthError>>) -> Self {
            Self {
                script: script.into(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl TokenProvider for ScriptedAuth {
        async fn access_token(&mut self) -> Result<AccessToken, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.pop_front().unwrap_or_else(|| Ok(valid_token()))
        }

        fn invalidate(&mut self) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub struct FakeFares {
        responses: Mutex<HashMap<NaiveDate, VecDeque<Result<Option<FareQuote>, QueryError>>>>,
        pub requests: Arc<Mutex<Vec<FareSearch>>>,
    }

    impl FakeFares {
        pub fn respond(self, date: NaiveDate, result: Result<Option<FareQuote>, QueryError>) -> Self {
            self.responses
                .lock()
                .unwrap()
                .entry(date)
                .or_default()
                .push_back(result);
            self
        }

        pub fn quote(self, date: NaiveDate, price: Decimal) -> Self {
            let quote = FareQuote {
                departure_date: date,
                return_date: date + chrono::Duration::days(14),
                price,
                currency: "USD".to_string(),
                nonstop: true,
            };
            self.respond(date, Ok(Some(quote)))
        }
    }

    #[async_trait]
    impl FareSource for FakeFares {
        async fn search(
            &self,
            _token: &AccessToken,
            search: &FareSearch,
        ) -> Result<Option<FareQuote>, QueryError> {
            self.requests.lock().unwrap().push(search.clone());
            self.responses
                .lock()
                .unwrap()
                .get_mut(&search.departure_date)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(Ok(None))
        }
    }

    #[derive(Default)]
    pub struct MemoryStore {
        pub initial: BestPrice,
        pub saved: Arc<Mutex<Vec<BestPriceRecord>>>,
        pub fail: bool,
    }

    impl PriceStore for MemoryStore {
        fn load(&self) -> BestPrice {
            match self.saved.lock().unwrap().last() {
                Some(record) => BestPrice::Known(record.clone()),
                None => self.initial.clone(),
            }
        }

        fn save(&self, record: &BestPriceRecord) -> Result<(), PersistenceError> {
            if self.fail {
                return Err(PersistenceError::Io {
                    path: "memory".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                });
            }
            self.saved.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Arc<Mutex<Vec<BestPriceRecord>>>,
        pub attempts: Arc<AtomicUsize>,
        pub fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, record: &BestPriceRecord, _previous: &BestPrice) -> Result<(), NotificationError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NotificationError::Delivery("535 authentication rejected".to_string()));
            }
            self.sent.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    pub struct FixedClock {
        pub today: NaiveDate,
        pub now: DateTime<Utc>,
        pub sleeps: Arc<Mutex<Vec<Duration>>>,
    }

    #[async_trait]
    impl Clock for FixedClock {
        fn today(&self) -> NaiveDate {
            self.today
        }

        fn now(&self) -> DateTime<Utc> {
            self.now
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }
}
