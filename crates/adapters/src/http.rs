//! Shared HTTP plumbing for the network adapters

use reqwest::Client;
use reqwest::header::HeaderMap;
use skymirror_domain::RateLimitStatus;
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const USER_AGENT: &str = concat!("skymirror/", env!("CARGO_PKG_VERSION"));

/// Client with the timeout and user agent every adapter uses
pub(crate) fn client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Reset time given as unix seconds
pub(crate) fn unix_reset(headers: &HeaderMap, name: &str) -> Option<OffsetDateTime> {
    header_str(headers, name)
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
}

/// Reset time given as an RFC 3339 timestamp
pub(crate) fn rfc3339_reset(headers: &HeaderMap, name: &str) -> Option<OffsetDateTime> {
    header_str(headers, name).and_then(|s| OffsetDateTime::parse(s.trim(), &Rfc3339).ok())
}

pub(crate) fn remaining(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_str(headers, name).and_then(|s| s.trim().parse::<u64>().ok())
}

/// Last rate-limit figures seen on responses from one network
#[derive(Debug, Default)]
pub(crate) struct RateLimitTracker {
    last: Mutex<Option<RateLimitStatus>>,
}

impl RateLimitTracker {
    pub(crate) fn record(&self, remaining: Option<u64>, reset_at: Option<OffsetDateTime>) {
        let Some(remaining) = remaining else {
            return;
        };
        if let Ok(mut last) = self.last.lock() {
            *last = Some(RateLimitStatus {
                remaining,
                reset_at,
            });
        }
    }

    pub(crate) fn get(&self) -> Option<RateLimitStatus> {
        self.last.lock().ok().and_then(|last| *last)
    }
}
