//! Authorization collaborator contract.
//!
//! The core never implements a permission model. It asks an [`Authorizer`]
//! before any mutating call that originates outside the runtime and fails
//! with [`CoreError::PermissionDenied`] without side effects when refused.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult};

/// Identity of whoever is calling into the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller(pub String);

impl Caller {
    /// Create a caller identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity used for calls made by the runtime itself.
    #[must_use]
    pub fn system() -> Self {
        Self("system".into())
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of operation being authorized, without arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Cache insert.
    Put,
    /// Cache removal.
    Remove,
    /// Task submission.
    Schedule,
    /// Task cancellation.
    Cancel,
    /// Event subscription.
    Subscribe,
    /// Event publication.
    Publish,
}

/// Operation being authorized, with the resource it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<'a> {
    /// Insert `key` into the cache.
    Put {
        /// Cache key.
        key: &'a str,
    },
    /// Remove `key` from the cache.
    Remove {
        /// Cache key.
        key: &'a str,
    },
    /// Submit a task.
    Schedule,
    /// Cancel a task.
    Cancel,
    /// Subscribe to `pattern`.
    Subscribe {
        /// Topic pattern.
        pattern: &'a str,
    },
    /// Publish on `topic`.
    Publish {
        /// Event topic.
        topic: &'a str,
    },
}

impl Action<'_> {
    /// Argument-free kind of this action.
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Put { .. } => ActionKind::Put,
            Self::Remove { .. } => ActionKind::Remove,
            Self::Schedule => ActionKind::Schedule,
            Self::Cancel => ActionKind::Cancel,
            Self::Subscribe { .. } => ActionKind::Subscribe,
            Self::Publish { .. } => ActionKind::Publish,
        }
    }
}

impl fmt::Display for Action<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put { key } => write!(f, "put `{key}`"),
            Self::Remove { key } => write!(f, "remove `{key}`"),
            Self::Schedule => f.write_str("schedule"),
            Self::Cancel => f.write_str("cancel"),
            Self::Subscribe { pattern } => write!(f, "subscribe to `{pattern}`"),
            Self::Publish { topic } => write!(f, "publish on `{topic}`"),
        }
    }
}

/// Permission check supplied by the embedding application.
pub trait Authorizer: Send + Sync {
    /// Whether `caller` may perform `action`.
    fn allowed(&self, caller: &Caller, action: &Action<'_>) -> bool;
}

/// Authorizer that permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn allowed(&self, _caller: &Caller, _action: &Action<'_>) -> bool {
        true
    }
}

/// Static grant table: each caller is granted a set of action kinds.
///
/// Callers that are not in the table are denied everything.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    grants: HashMap<Caller, HashSet<ActionKind>>,
}

impl AllowList {
    /// Empty table (denies everyone).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `kinds` to `caller`.
    #[must_use]
    pub fn grant(mut self, caller: Caller, kinds: impl IntoIterator<Item = ActionKind>) -> Self {
        self.grants.entry(caller).or_default().extend(kinds);
        self
    }
}

impl Authorizer for AllowList {
    fn allowed(&self, caller: &Caller, action: &Action<'_>) -> bool {
        self.grants
            .get(caller)
            .is_some_and(|kinds| kinds.contains(&action.kind()))
    }
}

/// Run the permission check, mapping a refusal to [`CoreError::PermissionDenied`].
///
/// # Errors
///
/// Returns `PermissionDenied` when the authorizer refuses the action.
pub fn authorize(
    authorizer: &dyn Authorizer,
    caller: &Caller,
    action: &Action<'_>,
) -> CoreResult<()> {
    if authorizer.allowed(caller, action) {
        Ok(())
    } else {
        tracing::warn!(caller = %caller, action = %action, "permission denied");
        Err(CoreError::PermissionDenied {
            caller: caller.to_string(),
            action: action.to_string(),
        })
    }
}
