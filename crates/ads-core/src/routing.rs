//! Active routing state
//!
//! Which identity, region override and profile a caller is currently working
//! with. State is kept per session id with a process-wide default entry for
//! callers that have no session (stdio, tests).
//!
//! Each session field is in one of three states: never touched (inherits the
//! default entry), explicitly cleared (resolves to nothing, so the identity or
//! configured default applies) or set. Session entries that go untouched for
//! longer than the idle limit are dropped.
//!
//! A session bound to caller-supplied broker credentials never inherits from
//! the default entry: those selections belong to a different principal.
//!
//! # Known limitation
//!
//! The lock only serialises reads and writes. Callers that share a session id,
//! or that have no session at all, still share one entry: a
//! `set_region_override` from one of them changes the routing of every other
//! in-flight and later call on that entry until it is cleared. Hosts should
//! supply a session key wherever they have one.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::region::Region;
use crate::secret::mask;
use crate::settings::Settings;

/// Effective routing selections for one session (or the process default)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutingEntry {
    pub identity_id: Option<String>,
    pub region_override: Option<Region>,
    pub profile_id: Option<String>,
    /// Fingerprint of the caller credentials the session is bound to
    #[serde(skip)]
    pub caller_key: Option<String>,
}

/// Session-level value of one field
#[derive(Debug, Clone, PartialEq, Eq)]
enum Selection<T> {
    Inherit,
    Cleared,
    Set(T),
}

impl<T: Clone> Selection<T> {
    fn from_option(value: Option<T>) -> Self {
        value.map_or(Self::Cleared, Self::Set)
    }

    fn or(&self, fallback: &Option<T>) -> Option<T> {
        match self {
            Self::Inherit => fallback.clone(),
            Self::Cleared => None,
            Self::Set(value) => Some(value.clone()),
        }
    }
}

struct SessionEntry {
    identity_id: Selection<String>,
    region_override: Selection<Region>,
    profile_id: Selection<String>,
    caller_key: Option<String>,
    last_seen: Instant,
}

impl SessionEntry {
    fn new(now: Instant) -> Self {
        Self {
            identity_id: Selection::Inherit,
            region_override: Selection::Inherit,
            profile_id: Selection::Inherit,
            caller_key: None,
            last_seen: now,
        }
    }

    fn over(&self, default: &RoutingEntry) -> RoutingEntry {
        let empty = RoutingEntry::default();
        let fallback = if self.caller_key.is_some() {
            &empty
        } else {
            default
        };

        RoutingEntry {
            identity_id: self.identity_id.or(&fallback.identity_id),
            region_override: self.region_override.or(&fallback.region_override),
            profile_id: self.profile_id.or(&fallback.profile_id),
            caller_key: self.caller_key.clone(),
        }
    }
}

#[derive(Default)]
struct Entries {
    default: RoutingEntry,
    sessions: HashMap<String, SessionEntry>,
}

impl Entries {
    /// Drop sessions idle for longer than `max_age`
    fn expire(&mut self, now: Instant, max_age: Duration) {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| now.duration_since(entry.last_seen) < max_age);
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            debug!("Expired {} idle routing sessions", dropped);
        }
    }

    fn session_mut(&mut self, session: &str, now: Instant) -> &mut SessionEntry {
        let entry = self
            .sessions
            .entry(session.to_string())
            .or_insert_with(|| SessionEntry::new(now));
        entry.last_seen = now;
        entry
    }
}

/// Session-keyed routing state with a process-wide default
pub struct RoutingState {
    entries: RwLock<Entries>,
    max_age: Duration,
}

impl Default for RoutingState {
    fn default() -> Self {
        Self::new(Duration::from_secs(Settings::DEFAULT_SESSION_MAX_AGE_SECS))
    }
}

impl RoutingState {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            max_age,
        }
    }

    /// Effective selections for a session
    ///
    /// Resolving counts as activity and keeps the session alive.
    pub async fn resolve(&self, session: Option<&str>) -> RoutingEntry {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.expire(now, self.max_age);

        let Entries { default, sessions } = &mut *entries;
        match session.and_then(|s| sessions.get_mut(s)) {
            Some(entry) => {
                entry.last_seen = now;
                entry.over(default)
            }
            None => default.clone(),
        }
    }

    pub async fn set_identity(&self, session: Option<&str>, identity_id: Option<String>) {
        debug!(
            "Active identity for {} -> {:?}",
            describe(session),
            identity_id
        );
        self.update(session, |default| default.identity_id = identity_id.clone(), |entry| {
            entry.identity_id = Selection::from_option(identity_id.clone())
        })
        .await;
    }

    pub async fn set_region_override(&self, session: Option<&str>, region: Option<Region>) {
        debug!("Region override for {} -> {:?}", describe(session), region);
        self.update(session, |default| default.region_override = region, |entry| {
            entry.region_override = Selection::from_option(region)
        })
        .await;
    }

    pub async fn set_profile(&self, session: Option<&str>, profile_id: Option<String>) {
        debug!("Active profile for {} -> {:?}", describe(session), profile_id);
        self.update(session, |default| default.profile_id = profile_id.clone(), |entry| {
            entry.profile_id = Selection::from_option(profile_id.clone())
        })
        .await;
    }

    /// Bind a session to caller-supplied credentials
    ///
    /// Rebinding to different credentials forgets the identity and profile
    /// selections made under the previous ones.
    pub async fn bind_caller(&self, session: &str, caller_key: String) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.expire(now, self.max_age);

        let entry = entries.session_mut(session, now);
        if entry.caller_key.as_deref() != Some(caller_key.as_str()) {
            debug!(
                "Session {} bound to caller credentials {}",
                mask(session),
                caller_key
            );
            entry.identity_id = Selection::Inherit;
            entry.profile_id = Selection::Inherit;
            entry.caller_key = Some(caller_key);
        }
    }

    async fn update<D, S>(&self, session: Option<&str>, on_default: D, on_session: S)
    where
        D: FnOnce(&mut RoutingEntry),
        S: FnOnce(&mut SessionEntry),
    {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.expire(now, self.max_age);

        match session {
            Some(session) => on_session(entries.session_mut(session, now)),
            None => on_default(&mut entries.default),
        }
    }

    /// Forget a session's selections
    pub async fn end_session(&self, session: &str) {
        self.entries.write().await.sessions.remove(session);
    }

    /// Number of live sessions holding their own selections
    pub async fn session_count(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries
            .sessions
            .values()
            .filter(|entry| now.duration_since(entry.last_seen) < self.max_age)
            .count()
    }

    /// Clear the default entry and every session
    pub async fn reset(&self) {
        *self.entries.write().await = Entries::default();
    }
}

fn describe(session: Option<&str>) -> String {
    match session {
        Some(session) => format!("session {}", mask(session)),
        None => "default routing".to_string(),
    }
}
