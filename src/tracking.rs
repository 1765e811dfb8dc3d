//! Bridges tab activity to usage increments. A browser side observer owns a [TrackingSession]
//! and feeds the increments it produces into
//! [ReportScheduler::add_time](crate::daemon::scheduler::ReportScheduler::add_time).

use chrono::{DateTime, Utc};

/// Maps urls to tracked site identifiers by domain.
#[derive(Debug, Clone)]
pub struct SiteMatcher {
    domains: Vec<(String, String)>,
}

impl Default for SiteMatcher {
    fn default() -> Self {
        Self::new([("instagram.com", "instagram"), ("youtube.com", "youtube")])
    }
}

impl SiteMatcher {
    pub fn new<D: Into<String>, S: Into<String>>(domains: impl IntoIterator<Item = (D, S)>) -> Self {
        Self {
            domains: domains
                .into_iter()
                .map(|(domain, site)| (domain.into(), site.into()))
                .collect(),
        }
    }

    pub fn site_for(&self, url: &str) -> Option<&str> {
        self.domains
            .iter()
            .find(|(domain, _)| url.contains(domain.as_str()))
            .map(|(_, site)| site.as_str())
    }

    /// Unique site identifiers in configuration order.
    pub fn site_names(&self) -> Vec<String> {
        let mut names: Vec<String> = vec![];
        for (_, site) in &self.domains {
            if !names.contains(site) {
                names.push(site.clone());
            }
        }
        names
    }
}

/// Time spent on a site since the previous increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageIncrement {
    pub site: String,
    pub elapsed_ms: u64,
}

/// The currently focused tracked site, if any, and since when.
#[derive(Debug, Default)]
pub struct TrackingSession {
    active: Option<(String, DateTime<Utc>)>,
}

impl TrackingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_site(&self) -> Option<&str> {
        self.active.as_ref().map(|(site, _)| site.as_str())
    }

    /// A tab with `url` became active, or the active tab navigated. Closes the running interval
    /// and starts a new one when the url is tracked.
    pub fn focus(
        &mut self,
        matcher: &SiteMatcher,
        url: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<UsageIncrement> {
        let increment = self.blur(now);
        if let Some(site) = url.and_then(|v| matcher.site_for(v)) {
            self.active = Some((site.to_owned(), now));
        }
        increment
    }

    /// Flushes the running interval without ending it, so that a crash loses at most one
    /// sampling period.
    pub fn sample(&mut self, now: DateTime<Utc>) -> Option<UsageIncrement> {
        let increment = self.blur(now)?;
        self.active = Some((increment.site.clone(), now));
        Some(increment)
    }

    /// The browser lost focus.
    pub fn blur(&mut self, now: DateTime<Utc>) -> Option<UsageIncrement> {
        let (site, started) = self.active.take()?;
        // A clock jumping backwards yields zero instead of a negative interval.
        let elapsed_ms = (now - started).num_milliseconds().max(0) as u64;
        Some(UsageIncrement { site, elapsed_ms })
    }
}
