//! Set-difference plan for one reconciliation cycle.
//!
//! The registry never mutates its proxy table ad hoc.  Each cycle it compares
//! the ids the daemon just reported with the ids that have a live proxy and
//! acts on the three resulting sets:
//!
//! ```text
//!   observed = {A, B, C}      live = {B, C, D}
//!
//!   added    = observed - live  = {A}     start a proxy
//!   removed  = live - observed  = {D}     stop its proxy
//!   retained = observed ∩ live  = {B, C}  refresh status / metadata
//! ```
//!
//! `BTreeSet` keeps every set sorted, so proxies start and stop in a
//! deterministic order and log output is stable between runs.

use std::collections::BTreeSet;

use devgate_core::DeviceId;

/// What one cycle has to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub added: BTreeSet<DeviceId>,
    pub removed: BTreeSet<DeviceId>,
    pub retained: BTreeSet<DeviceId>,
}

impl ReconciliationPlan {
    /// Computes the plan for `observed` ids against `live` ids.
    ///
    /// Duplicates in either input are collapsed.
    pub fn compute<'a, O, L>(observed: O, live: L) -> Self
    where
        O: IntoIterator<Item = &'a DeviceId>,
        L: IntoIterator<Item = &'a DeviceId>,
    {
        let observed: BTreeSet<DeviceId> = observed.into_iter().cloned().collect();
        let live: BTreeSet<DeviceId> = live.into_iter().cloned().collect();

        Self {
            added: observed.difference(&live).cloned().collect(),
            removed: live.difference(&observed).cloned().collect(),
            retained: observed.intersection(&live).cloned().collect(),
        }
    }

    /// `true` when no proxy has to be started or stopped.
    pub fn is_steady(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
