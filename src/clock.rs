// Time source and sleeping, injected so the poll loop can run without waiting

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    // Calendar date the search window is anchored on
    fn today(&self) -> NaiveDate;

    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
