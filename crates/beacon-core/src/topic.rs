//! Topic addressing.
//!
//! A [`Topic`] names a subscriber set. [`TopicMap`] is the multi-map from
//! topic to the sessions subscribed to it; it is the only addressing
//! mechanism the broker has. Publishing to a topic nobody follows is a
//! no-op.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use beacon_types::{IncidentId, ResponderId, ResponderType, Role, SessionId, UserId};

/// A named subscriber set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// `role:<role>`, every session holding the role.
    Role(Role),
    /// `user:<id>`, every session of one user.
    User(UserId),
    /// `incident:<id>`, sessions following one incident.
    Incident(IncidentId),
    /// `responder:<id>`, sessions of one responder unit.
    Responder(ResponderId),
    /// `responder_type:<TYPE>`, registered responders of one kind.
    ResponderType(ResponderType),
}

impl Topic {
    /// The command-center topics (`role:admin` and `role:operator`).
    pub const COMMAND_CENTER: [Self; 2] = [Self::Role(Role::Admin), Self::Role(Role::Operator)];
}

/// A topic string that names no known topic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown topic: {0}")]
pub struct UnknownTopic(pub String);

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownTopic(s.to_owned());
        let (kind, key) = s.split_once(':').ok_or_else(unknown)?;
        if key.is_empty() {
            return Err(unknown());
        }
        match kind {
            "role" => Role::ALL
                .into_iter()
                .find(|role| role.topic_name() == key)
                .map(Self::Role)
                .ok_or_else(unknown),
            "user" => Ok(Self::User(UserId::new(key))),
            "incident" => key.parse().map(Self::Incident).map_err(|e| {
                tracing::debug!(topic = s, error = %e, "bad incident id in topic");
                unknown()
            }),
            "responder" => Ok(Self::Responder(ResponderId::new(key))),
            "responder_type" => key.parse().map(Self::ResponderType).map_err(|e: String| {
                tracing::debug!(topic = s, error = %e, "bad responder type in topic");
                unknown()
            }),
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role(role) => write!(f, "role:{}", role.topic_name()),
            Self::User(id) => write!(f, "user:{id}"),
            Self::Incident(id) => write!(f, "incident:{id}"),
            Self::Responder(id) => write!(f, "responder:{id}"),
            Self::ResponderType(kind) => write!(f, "responder_type:{kind}"),
        }
    }
}

/// Multi-map from topic to subscribed sessions.
///
/// Not synchronized; the owner ([`SessionRegistry`](crate::session::SessionRegistry))
/// holds it under its lock.
#[derive(Debug, Default)]
pub struct TopicMap {
    subscribers: HashMap<Topic, BTreeSet<SessionId>>,
}

impl TopicMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `session` to `topic`. Returns `false` if it already was.
    pub fn join(&mut self, topic: Topic, session: SessionId) -> bool {
        self.subscribers.entry(topic).or_default().insert(session)
    }

    /// Unsubscribe `session` from `topic`. Empty topics are dropped.
    pub fn leave(&mut self, topic: &Topic, session: SessionId) -> bool {
        let Some(set) = self.subscribers.get_mut(topic) else {
            return false;
        };
        let removed = set.remove(&session);
        if set.is_empty() {
            self.subscribers.remove(topic);
        }
        removed
    }

    /// Drop a topic and all of its subscriptions, returning the former
    /// subscribers.
    pub fn drop_topic(&mut self, topic: &Topic) -> BTreeSet<SessionId> {
        self.subscribers.remove(topic).unwrap_or_default()
    }

    /// Sessions subscribed to any of `topics`, each listed once.
    pub fn resolve<'a>(&self, topics: impl IntoIterator<Item = &'a Topic>) -> BTreeSet<SessionId> {
        topics
            .into_iter()
            .filter_map(|topic| self.subscribers.get(topic))
            .flatten()
            .copied()
            .collect()
    }

    /// Subscribers of one topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.subscribers.get(topic).map_or(0, BTreeSet::len)
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Every live topic with its subscriber count, sorted by topic.
    pub fn topics(&self) -> Vec<(Topic, usize)> {
        let mut topics: Vec<(Topic, usize)> = self
            .subscribers
            .iter()
            .map(|(topic, set)| (topic.clone(), set.len()))
            .collect();
        topics.sort();
        topics
    }
}
