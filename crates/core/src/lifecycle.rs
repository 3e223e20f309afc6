//! Campaign lifecycle: the finite set of legal persisted status transitions.

use crate::types::CampaignStatus;

/// Describes a single valid status transition for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: CampaignStatus,
    pub to: CampaignStatus,
    pub trigger: &'static str,
}

const TRANSITIONS: &[StatusTransition] = &[
    // Draft ->
    StatusTransition {
        from: CampaignStatus::Draft,
        to: CampaignStatus::Scheduled,
        trigger: "schedule",
    },
    StatusTransition {
        from: CampaignStatus::Draft,
        to: CampaignStatus::Running,
        trigger: "launch",
    },
    // Scheduled ->
    StatusTransition {
        from: CampaignStatus::Scheduled,
        to: CampaignStatus::Running,
        trigger: "schedule_elapsed",
    },
    StatusTransition {
        from: CampaignStatus::Scheduled,
        to: CampaignStatus::Draft,
        trigger: "unschedule",
    },
    StatusTransition {
        from: CampaignStatus::Scheduled,
        to: CampaignStatus::Cancelled,
        trigger: "cancel",
    },
    // Running ->
    StatusTransition {
        from: CampaignStatus::Running,
        to: CampaignStatus::Paused,
        trigger: "pause",
    },
    StatusTransition {
        from: CampaignStatus::Running,
        to: CampaignStatus::Cancelled,
        trigger: "cancel",
    },
    StatusTransition {
        from: CampaignStatus::Running,
        to: CampaignStatus::Finished,
        trigger: "exhausted",
    },
    // Paused ->
    StatusTransition {
        from: CampaignStatus::Paused,
        to: CampaignStatus::Running,
        trigger: "resume",
    },
    StatusTransition {
        from: CampaignStatus::Paused,
        to: CampaignStatus::Cancelled,
        trigger: "cancel",
    },
];

/// Returns the transition from `from` to `to`, if it is allowed.
pub fn transition(from: CampaignStatus, to: CampaignStatus) -> Option<&'static StatusTransition> {
    TRANSITIONS.iter().find(|t| t.from == from && t.to == to)
}

/// Returns `true` if the given transition is allowed.
pub fn can_transition(from: CampaignStatus, to: CampaignStatus) -> bool {
    transition(from, to).is_some()
}

/// All statuses reachable from `from` in one step.
pub fn next_statuses(from: CampaignStatus) -> Vec<CampaignStatus> {
    TRANSITIONS
        .iter()
        .filter(|t| t.from == from)
        .map(|t| t.to)
        .collect()
}
