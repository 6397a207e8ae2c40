//! Redirect-completion signals carried in query parameters.

use std::collections::BTreeMap;

use reqwest::Url;

use crate::config::RedirectConfig;

/// Status and correlation ids found on a return URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectSignal {
    /// Raw value of the status parameter.
    pub status: String,
    /// True when the status equals the configured success value.
    pub success: bool,
    /// Correlation parameters present on the URL.
    pub correlation: BTreeMap<String, String>,
}

impl RedirectSignal {
    /// Read the signal from `url`, if it carries the status parameter.
    #[must_use]
    pub fn detect(url: &Url, config: &RedirectConfig) -> Option<Self> {
        let mut status = None;
        let mut correlation = BTreeMap::new();
        for (name, value) in url.query_pairs() {
            if name == config.status_param {
                status.get_or_insert_with(|| value.into_owned());
            } else if config.correlation_params.iter().any(|param| *param == name) {
                correlation.entry(name.into_owned()).or_insert_with(|| value.into_owned());
            }
        }
        let status = status?;
        Some(Self {
            success: status == config.success_value,
            status,
            correlation,
        })
    }

    /// Value of a correlation parameter, e.g. `customer_id`.
    #[must_use]
    pub fn correlation_id(&self, name: &str) -> Option<&str> {
        self.correlation.get(name).map(String::as_str)
    }
}

/// Copy of `url` without the status and correlation parameters.
///
/// Other parameters keep their order. The result is meant to replace the
/// current history entry so that a reload does not restart the poll.
#[must_use]
pub fn strip_signal(url: &Url, config: &RedirectConfig) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| {
            *name != config.status_param && !config.correlation_params.iter().any(|param| *param == *name)
        })
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}
