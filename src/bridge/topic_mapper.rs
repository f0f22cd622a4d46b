//! Topic Mapping for Bridge Forwarding
//!
//! Platform traffic lives under a fixed root:
//! - `<root>/outgoing/<rest>` on the platform is forwarded to `<rest>` on the secondary broker
//! - `<topic>` on the secondary broker is forwarded to `<root>/incoming/<topic>` on the platform
//!
//! The platform side only strips by level count, so any second level is
//! accepted, not just `outgoing`.

use crate::error::MalformedTopicError;

/// Level under the root that the platform publishes bridge-bound traffic to
pub const OUTGOING: &str = "outgoing";
/// Level under the root that forwarded secondary traffic is published to
pub const INCOMING: &str = "incoming";

/// Maps topics between the platform and the secondary broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMapper {
    root: String,
}

impl TopicMapper {
    /// `root` must be a single, wildcard-free topic level
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// Filter the platform side subscribes with
    pub fn platform_subscription(&self) -> String {
        format!("{}/{}/#", self.root, OUTGOING)
    }

    /// Map a platform topic to the secondary broker by dropping its first two levels
    pub fn to_secondary(&self, topic: &str) -> Result<String, MalformedTopicError> {
        let malformed = || MalformedTopicError {
            topic: topic.to_string(),
        };

        let mut levels = topic.splitn(3, '/');
        let (Some(_), Some(_), Some(rest)) = (levels.next(), levels.next(), levels.next()) else {
            return Err(malformed());
        };
        if rest.is_empty() {
            return Err(malformed());
        }
        Ok(rest.to_string())
    }

    /// Map a secondary broker topic onto the platform
    pub fn to_platform(&self, topic: &str) -> String {
        format!("{}/{}/{}", self.root, INCOMING, topic)
    }
}
