//! Notice configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::NoticeKind;

/// Configuration for notice delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Whether notices are delivered at all
    pub enabled: bool,

    /// Notice kinds that are never delivered (by name, e.g. `mutation-started`)
    pub muted: Vec<String>,

    /// Message overrides keyed by notice kind name
    pub messages: BTreeMap<String, String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            muted: Vec::new(),
            messages: BTreeMap::new(),
        }
    }
}

impl NotifyConfig {
    /// Check if a specific notice kind is delivered
    #[must_use]
    pub fn is_enabled(&self, kind: NoticeKind) -> bool {
        self.enabled && !self.muted.iter().any(|name| name == kind.name())
    }

    /// Configured message override for a notice kind
    #[must_use]
    pub fn message_for(&self, kind: NoticeKind) -> Option<&str> {
        self.messages.get(kind.name()).map(String::as_str)
    }

    /// Names in `muted` or `messages` that match no notice kind
    #[must_use]
    pub fn unknown_kinds(&self) -> Vec<&str> {
        self.muted
            .iter()
            .chain(self.messages.keys())
            .map(String::as_str)
            .filter(|name| NoticeKind::from_name(name).is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn muted_kinds_are_disabled() {
        let config = NotifyConfig {
            muted: vec!["mutation-started".into()],
            ..NotifyConfig::default()
        };
        assert!(!config.is_enabled(NoticeKind::MutationStarted));
        assert!(config.is_enabled(NoticeKind::MutationFailed));
    }

    #[test]
    fn disabled_config_mutes_everything() {
        let config = NotifyConfig {
            enabled: false,
            ..NotifyConfig::default()
        };
        assert!(NoticeKind::ALL.iter().all(|kind| !config.is_enabled(*kind)));
    }

    #[test]
    fn unknown_kind_names_are_reported() {
        let mut config = NotifyConfig {
            muted: vec!["poll-timed-out".into(), "typo".into()],
            ..NotifyConfig::default()
        };
        config.messages.insert("mutation-succeeded".into(), "Saved!".into());
        config.messages.insert("other".into(), "?".into());

        assert_eq!(config.unknown_kinds(), vec!["typo", "other"]);
        assert_eq!(config.message_for(NoticeKind::MutationSucceeded), Some("Saved!"));
        assert_eq!(config.message_for(NoticeKind::MutationFailed), None);
    }
}
