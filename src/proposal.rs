use std::collections::HashMap;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProposalError;
use crate::event::{CalendarEvent, Identity, TimeInterval};
use crate::intent::SchedulingIntent;
use crate::wire::MeetingRequest;

/// Opaque proposal token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(Uuid);

impl ProposalId {
    pub fn new() -> Self {
        ProposalId(Uuid::new_v4())
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        ProposalId::new()
    }
}

impl Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for ProposalId {
    type Err = ProposalError;

    /// A token that is not even well formed cannot name a stored proposal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(ProposalId)
            .map_err(|_| ProposalError::NotFound(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Confirmed => "confirmed",
            ProposalStatus::Cancelled => "cancelled",
        })
    }
}

/// A resolved request awaiting confirmation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulingProposal {
    pub id: ProposalId,
    pub request: MeetingRequest,
    pub intent: SchedulingIntent,
    pub resolved_slot: TimeInterval,
    /// In participant order.
    pub per_attendee_events: Vec<(Identity, Vec<CalendarEvent>)>,
    pub status: ProposalStatus,
}

impl SchedulingProposal {
    /// Moves a pending proposal to `to`. Terminal states never change again.
    fn transition(&mut self, to: ProposalStatus) -> Result<(), ProposalError> {
        match self.status {
            ProposalStatus::Pending => {
                self.status = to;
                Ok(())
            }
            from => Err(ProposalError::InvalidTransition {
                id: self.id,
                from,
                to,
            }),
        }
    }
}

/// Process-lifetime proposal storage.
///
/// The map lock is held only to find or insert an entry; each proposal has its own mutex, so
/// concurrent transitions on one id are serialized while different ids never contend.
#[derive(Debug, Default)]
pub struct ProposalStore {
    proposals: RwLock<HashMap<ProposalId, Arc<Mutex<SchedulingProposal>>>>,
}

impl ProposalStore {
    pub fn new() -> Self {
        ProposalStore::default()
    }

    pub fn insert(&self, proposal: SchedulingProposal) -> ProposalId {
        let id = proposal.id;
        self.proposals
            .write()
            .insert(id, Arc::new(Mutex::new(proposal)));
        info!("Stored proposal {}", id);
        id
    }

    fn entry(&self, id: &ProposalId) -> Result<Arc<Mutex<SchedulingProposal>>, ProposalError> {
        self.proposals
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ProposalError::NotFound(id.to_string()))
    }

    /// A snapshot of the proposal.
    pub fn get(&self, id: &ProposalId) -> Result<SchedulingProposal, ProposalError> {
        Ok(self.entry(id)?.lock().clone())
    }

    pub fn confirm(&self, id: &ProposalId) -> Result<SchedulingProposal, ProposalError> {
        self.transition(id, ProposalStatus::Confirmed)
    }

    pub fn cancel(&self, id: &ProposalId) -> Result<SchedulingProposal, ProposalError> {
        self.transition(id, ProposalStatus::Cancelled)
    }

    fn transition(
        &self,
        id: &ProposalId,
        to: ProposalStatus,
    ) -> Result<SchedulingProposal, ProposalError> {
        let entry = self.entry(id)?;
        let mut proposal = entry.lock();
        proposal.transition(to)?;
        debug!("Proposal {} is now {}", id, to);
        Ok(proposal.clone())
    }

    /// Every stored id with its current status, ordered by id.
    pub fn list(&self) -> Vec<(ProposalId, ProposalStatus)> {
        let entries: Vec<_> = self.proposals.read().values().cloned().collect();
        let mut listed: Vec<_> = entries
            .iter()
            .map(|entry| {
                let proposal = entry.lock();
                (proposal.id, proposal.status)
            })
            .collect();
        listed.sort_by_key(|(id, _)| *id);
        listed
    }

    pub fn len(&self) -> usize {
        self.proposals.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::day::DayConstraint;
    use chrono::{FixedOffset, TimeZone};

    fn proposal() -> SchedulingProposal {
        let start = FixedOffset::east_opt(19_800)
            .unwrap()
            .with_ymd_and_hms(2025, 7, 17, 10, 30, 0)
            .unwrap();
        SchedulingProposal {
            id: ProposalId::new(),
            request: MeetingRequest::default(),
            intent: SchedulingIntent {
                participants: vec![Identity::new("a@example.com")],
                duration_minutes: 30,
                day: DayConstraint::Flexible,
                time: None,
            },
            resolved_slot: TimeInterval::starting_at(start, 30),
            per_attendee_events: Vec::new(),
            status: ProposalStatus::Pending,
        }
    }

    #[test]
    fn confirm_is_not_idempotent() {
        let store = ProposalStore::new();
        let id = store.insert(proposal());

        assert_eq!(store.confirm(&id).unwrap().status, ProposalStatus::Confirmed);
        let second = store.confirm(&id).unwrap_err();

        assert_eq!(
            second,
            ProposalError::InvalidTransition {
                id,
                from: ProposalStatus::Confirmed,
                to: ProposalStatus::Confirmed
            }
        );
        assert_eq!(second.error_code(), "INVALID_PROPOSAL_TRANSITION");
        assert!(store.cancel(&id).is_err());
    }

    #[test]
    fn cancelled_proposals_stay_cancelled() {
        let store = ProposalStore::new();
        let id = store.insert(proposal());

        store.cancel(&id).unwrap();

        assert!(matches!(
            store.confirm(&id),
            Err(ProposalError::InvalidTransition {
                from: ProposalStatus::Cancelled,
                ..
            })
        ));
        assert_eq!(store.get(&id).unwrap().status, ProposalStatus::Cancelled);
    }

    #[test]
    fn unknown_ids() {
        let store = ProposalStore::new();

        assert_eq!(
            store.confirm(&ProposalId::new()).unwrap_err().error_code(),
            "PROPOSAL_NOT_FOUND"
        );
        assert!(matches!(
            "not-a-token".parse::<ProposalId>(),
            Err(ProposalError::NotFound(_))
        ));
    }

    #[test]
    fn concurrent_confirms_succeed_once() {
        let store = Arc::new(ProposalStore::new());
        let id = store.insert(proposal());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.confirm(&id).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(store.list(), vec![(id, ProposalStatus::Confirmed)]);
    }
}
