//! Topic names and filters
//!
//! Validation and wildcard matching for MQTT v3.1.1 topics, plus the
//! [`FilterSet`] used to answer "would this subscription receive that topic".

pub mod validation;

pub use validation::{topic_matches_filter, validate_topic_filter, validate_topic_name};

/// Filter that subscribes to every (non-`$`) topic
pub const SUBSCRIBE_ALL: &str = "#";

/// The set of filters one session is subscribed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSet {
    filters: Vec<String>,
}

impl FilterSet {
    /// Build from a configured list; an empty list means [`SUBSCRIBE_ALL`]
    pub fn new(filters: &[String]) -> Self {
        if filters.is_empty() {
            Self::all()
        } else {
            Self {
                filters: filters.to_vec(),
            }
        }
    }

    pub fn all() -> Self {
        Self {
            filters: vec![SUBSCRIBE_ALL.to_string()],
        }
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    /// Check whether any filter in the set matches the topic
    pub fn matches(&self, topic: &str) -> bool {
        self.filters
            .iter()
            .any(|filter| topic_matches_filter(topic, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_subscribes_to_everything() {
        let set = FilterSet::new(&[]);
        assert_eq!(set.filters(), &["#".to_string()]);
        assert!(set.matches("any/topic"));
    }

    #[test]
    fn test_explicit_filters() {
        let set = FilterSet::new(&["sensors/+".to_string(), "alarms/#".to_string()]);
        assert!(set.matches("sensors/temp"));
        assert!(set.matches("alarms/fire/floor1"));
        assert!(!set.matches("actuators/fan"));
    }
}
