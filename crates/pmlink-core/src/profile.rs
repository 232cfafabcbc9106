//! Instance-profile cache.
//!
//! The profile is the instance-inclusion/exclusion filter applied agent-side
//! during fetch. It is owned by exactly one connection, reset on every
//! (re)open, and pushed to the agent only when it has changed since the last
//! push (dirty flag). The dispatcher flushes it immediately before fetch and
//! store, never for metadata-only operations.

use crate::protocol::{FilterMode, IndomProfile, InstanceDomainId, ProfileSpec};

/// Cached instance filter plus its dirty flag.
#[derive(Debug, Clone)]
pub struct Profile {
    spec: ProfileSpec,
    dirty: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}

impl Profile {
    /// Fresh include-everything profile.
    ///
    /// Starts dirty: the agent has not seen any profile on a new connection,
    /// so the first fetch pushes the default state.
    pub fn new() -> Self {
        Self {
            spec: ProfileSpec::default(),
            dirty: true,
        }
    }

    /// Record an include/exclude rule for one instance domain.
    ///
    /// A later rule for the same domain replaces the earlier one.
    pub fn set_filter(&mut self, indom: InstanceDomainId, mode: FilterMode, instances: Vec<i32>) {
        self.spec.indoms.retain(|entry| entry.indom != indom);
        self.spec.indoms.push(IndomProfile {
            indom,
            mode,
            instances,
        });
        self.dirty = true;
    }

    /// Reset the global default state and drop all per-domain overrides.
    pub fn clear_all(&mut self, mode: FilterMode) {
        self.spec = ProfileSpec {
            default_mode: mode,
            indoms: Vec::new(),
        };
        self.dirty = true;
    }

    /// Whether the agent is out of date with respect to this profile.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the current state as pushed to the agent.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Current filter state, as sent in a ProfileUpdate.
    pub fn spec(&self) -> &ProfileSpec {
        &self.spec
    }
}

// =============================================================================
// Tests
// =============================================================================
