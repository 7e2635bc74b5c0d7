use std::collections::BTreeMap;

use crate::scan::PortState;

/// Per state counts plus the ports worth listing one by one.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub open: usize,
    pub closed: usize,
    pub filtered: usize,
    pub unknown: usize,
    pub detailed: Vec<(u16, PortState)>,
}

impl Summary {
    /// Summarizes `results`, leaving ports in one of `hidden` states out of
    /// the detail rows.
    pub fn new(results: &BTreeMap<u16, PortState>, hidden: &[PortState]) -> Self {
        let mut summary = Self::default();

        for (&port, &state) in results {
            match state {
                PortState::Open => summary.open += 1,
                PortState::Closed => summary.closed += 1,
                PortState::Filtered => summary.filtered += 1,
                PortState::Unknown => summary.unknown += 1,
            }

            if !hidden.contains(&state) {
                summary.detailed.push((port, state));
            }
        }

        summary
    }

    /// Filtered ports are usually the bulk of a scan and are left out.
    pub fn without_filtered(results: &BTreeMap<u16, PortState>) -> Self {
        Self::new(results, &[PortState::Filtered])
    }

    pub fn total(&self) -> usize {
        self.open + self.closed + self.filtered + self.unknown
    }
}
