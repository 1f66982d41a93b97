//! Campaign, recipient filter and recipient types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{CampaignId, Contact, ContactId, ContactStatus, RecipientId};

/// Seconds between two sends when the producer does not say otherwise.
pub const DEFAULT_PACING_SECS: u64 = 30;

/// Upper bound on pacing: one send per day.
pub const MAX_PACING_SECS: u64 = 86_400;

/// Look-back window of the inactive filter when none is given.
pub const DEFAULT_INACTIVE_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
    #[default]
    OneShot,
    /// Stored for producers; no automatic re-arming.
    Recurring,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignState {
    #[default]
    Draft,
    Scheduled,
    Sending,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignState::Completed | CampaignState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignState::Draft => "draft",
            CampaignState::Scheduled => "scheduled",
            CampaignState::Sending => "sending",
            CampaignState::Paused => "paused",
            CampaignState::Completed => "completed",
            CampaignState::Cancelled => "cancelled",
        }
    }

    pub const ALL: [CampaignState; 6] = [
        CampaignState::Draft,
        CampaignState::Scheduled,
        CampaignState::Sending,
        CampaignState::Paused,
        CampaignState::Completed,
        CampaignState::Cancelled,
    ];
}

impl std::fmt::Display for CampaignState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations that move a campaign through its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CampaignAction {
    Start,
    Pause,
    Resume,
    Edit,
    Cancel,
    /// Taken by the sender once no pending recipient is left.
    Complete,
}

impl CampaignAction {
    /// States from which the action is legal.
    pub fn allowed_from(&self) -> &'static [CampaignState] {
        use CampaignState::*;
        match self {
            CampaignAction::Start | CampaignAction::Edit => &[Draft, Scheduled, Paused],
            CampaignAction::Pause | CampaignAction::Complete => &[Sending],
            CampaignAction::Resume => &[Paused],
            CampaignAction::Cancel => &[Draft, Scheduled, Sending, Paused],
        }
    }

    /// Resulting state, or `None` when the action keeps the current one.
    pub fn target(&self) -> Option<CampaignState> {
        match self {
            CampaignAction::Start | CampaignAction::Resume => Some(CampaignState::Sending),
            CampaignAction::Pause => Some(CampaignState::Paused),
            CampaignAction::Cancel => Some(CampaignState::Cancelled),
            CampaignAction::Complete => Some(CampaignState::Completed),
            CampaignAction::Edit => None,
        }
    }

    pub fn is_allowed(&self, from: CampaignState) -> bool {
        self.allowed_from().contains(&from)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignAction::Start => "start",
            CampaignAction::Pause => "pause",
            CampaignAction::Resume => "resume",
            CampaignAction::Edit => "edit",
            CampaignAction::Cancel => "cancel",
            CampaignAction::Complete => "complete",
        }
    }
}

/// Which contacts a campaign targets. Blocked contacts never match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecipientFilter {
    #[default]
    All,
    /// Contacts silent for at least `days`, or who never wrote.
    Inactive {
        #[serde(default = "default_inactive_days")]
        days: u32,
    },
    /// Contacts carrying `tag`. A blank tag selects everyone.
    Tag { tag: String },
    /// Explicit contact ids. An empty list selects nobody.
    Manual {
        #[serde(default)]
        ids: Vec<ContactId>,
    },
}

fn default_inactive_days() -> u32 {
    DEFAULT_INACTIVE_DAYS
}

impl RecipientFilter {
    /// Collapse a blank tag into [`RecipientFilter::All`].
    pub fn normalized(self) -> Self {
        match self {
            RecipientFilter::Tag { tag } if tag.trim().is_empty() => RecipientFilter::All,
            RecipientFilter::Tag { tag } => RecipientFilter::Tag {
                tag: tag.trim().to_string(),
            },
            other => other,
        }
    }

    pub fn matches(&self, contact: &Contact, now: DateTime<Utc>) -> bool {
        if contact.status == ContactStatus::Blocked {
            return false;
        }
        match self {
            RecipientFilter::All => true,
            RecipientFilter::Inactive { days } => {
                let cutoff = now - Duration::days(i64::from(*days));
                contact.last_message_at.is_none_or(|at| at < cutoff)
            }
            RecipientFilter::Tag { tag } if tag.trim().is_empty() => true,
            RecipientFilter::Tag { tag } => contact.tags.iter().any(|t| t == tag.trim()),
            RecipientFilter::Manual { ids } => ids.contains(&contact.id),
        }
    }
}

/// A bulk-message campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Template with `{name}` and `{phone}` placeholders.
    pub message: String,
    pub kind: CampaignKind,
    pub state: CampaignState,
    /// Minimum seconds between two consecutive sends.
    pub pacing_secs: u64,
    pub filter: RecipientFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub total_recipients: u64,
    pub sent: u64,
    pub failed: u64,
    pub replied: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Time of the last send attempt, successful or not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_send_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Create a one-shot draft with default pacing that targets everyone.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let now = crate::timestamp::now();
        Self {
            id: CampaignId::new(),
            name: name.into(),
            description: None,
            message: message.into(),
            kind: CampaignKind::OneShot,
            state: CampaignState::Draft,
            pacing_secs: DEFAULT_PACING_SECS,
            filter: RecipientFilter::All,
            scheduled_at: None,
            total_recipients: 0,
            sent: 0,
            failed: 0,
            replied: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            last_send_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_kind(mut self, kind: CampaignKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_pacing(mut self, pacing_secs: u64) -> Self {
        self.pacing_secs = pacing_secs;
        self
    }

    pub fn with_filter(mut self, filter: RecipientFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Schedule the campaign; the state becomes `scheduled`.
    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self.state = CampaignState::Scheduled;
        self
    }

    /// Recipients still waiting for a send attempt.
    pub fn remaining(&self) -> u64 {
        self.total_recipients.saturating_sub(self.sent + self.failed)
    }

    /// Time left before the next send may go out, if any.
    pub fn pacing_remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let last = self.last_send_at?;
        let ready_at = i64::try_from(self.pacing_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|pacing| last.checked_add_signed(pacing))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (ready_at > now)
            .then(|| (ready_at - now).to_std().ok())
            .flatten()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientState {
    #[default]
    Pending,
    Sent,
    Failed,
    Replied,
}

impl RecipientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientState::Pending => "pending",
            RecipientState::Sent => "sent",
            RecipientState::Failed => "failed",
            RecipientState::Replied => "replied",
        }
    }
}

impl std::fmt::Display for RecipientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contact's delivery slot within a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    /// Insertion order; the sender walks recipients by ascending position.
    pub position: u64,
    pub state: RecipientState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_at: Option<DateTime<Utc>>,
}

impl Recipient {
    pub fn new(campaign_id: CampaignId, contact_id: ContactId, position: u64) -> Self {
        Self {
            id: RecipientId::new(),
            campaign_id,
            contact_id,
            position,
            state: RecipientState::Pending,
            error: None,
            sent_at: None,
            replied_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp;

    #[test]
    fn pause_only_from_sending() {
        assert!(CampaignAction::Pause.is_allowed(CampaignState::Sending));
        for state in [
            CampaignState::Draft,
            CampaignState::Scheduled,
            CampaignState::Paused,
            CampaignState::Completed,
            CampaignState::Cancelled,
        ] {
            assert!(!CampaignAction::Pause.is_allowed(state), "{state}");
        }
    }

    #[test]
    fn cancel_rejects_terminal_states() {
        for state in CampaignState::ALL {
            assert_eq!(CampaignAction::Cancel.is_allowed(state), !state.is_terminal());
        }
    }

    #[test]
    fn start_and_edit_share_predecessors() {
        assert_eq!(
            CampaignAction::Start.allowed_from(),
            CampaignAction::Edit.allowed_from()
        );
        assert_eq!(CampaignAction::Edit.target(), None);
        assert_eq!(CampaignAction::Resume.target(), Some(CampaignState::Sending));
    }

    #[test]
    fn blocked_contacts_never_match() {
        let now = timestamp::now();
        let blocked = Contact::new("+100").with_status(ContactStatus::Blocked);
        assert!(!RecipientFilter::All.matches(&blocked, now));
        let manual = RecipientFilter::Manual {
            ids: vec![blocked.id],
        };
        assert!(!manual.matches(&blocked, now));
    }

    #[test]
    fn inactive_filter_uses_cutoff() {
        let now = timestamp::now();
        let filter = RecipientFilter::Inactive { days: 30 };
        let silent = Contact::new("+1");
        let stale = Contact::new("+2").with_last_message_at(now - Duration::days(31));
        let recent = Contact::new("+3").with_last_message_at(now - Duration::days(2));
        assert!(filter.matches(&silent, now));
        assert!(filter.matches(&stale, now));
        assert!(!filter.matches(&recent, now));
    }

    #[test]
    fn tag_and_manual_filters() {
        let now = timestamp::now();
        let vip = Contact::new("+1").with_tags(vec!["vip".into()]);
        let other = Contact::new("+2");
        let tag = RecipientFilter::Tag { tag: "vip".into() };
        assert!(tag.matches(&vip, now));
        assert!(!tag.matches(&other, now));

        let empty = RecipientFilter::Manual { ids: vec![] };
        assert!(!empty.matches(&vip, now));
        let picked = RecipientFilter::Manual { ids: vec![other.id] };
        assert!(picked.matches(&other, now));
        assert!(!picked.matches(&vip, now));
    }

    #[test]
    fn inactive_days_defaults_when_missing() {
        let filter: RecipientFilter = serde_json::from_str(r#"{"kind":"inactive"}"#).unwrap();
        assert_eq!(filter, RecipientFilter::Inactive { days: 30 });
    }

    #[test]
    fn pacing_remaining_counts_down() {
        let now = timestamp::now();
        let mut campaign = Campaign::new("promo", "hi").with_pacing(10);
        assert_eq!(campaign.pacing_remaining(now), None);

        campaign.last_send_at = Some(now - Duration::seconds(4));
        let left = campaign.pacing_remaining(now).unwrap();
        assert_eq!(left.as_secs(), 6);

        campaign.last_send_at = Some(now - Duration::seconds(10));
        assert_eq!(campaign.pacing_remaining(now), None);

        campaign.pacing_secs = 0;
        campaign.last_send_at = Some(now);
        assert_eq!(campaign.pacing_remaining(now), None);
    }

    #[test]
    fn huge_pacing_saturates() {
        let now = timestamp::now();
        let mut campaign = Campaign::new("promo", "hi").with_pacing(10_000_000_000_000_000);
        campaign.last_send_at = Some(now);
        let left = campaign.pacing_remaining(now).unwrap();
        assert!(left > std::time::Duration::from_secs(86_400 * 365 * 1000));

        campaign.pacing_secs = u64::MAX;
        assert!(campaign.pacing_remaining(now).is_some());
    }

    #[test]
    fn blank_tag_selects_everyone() {
        let now = timestamp::now();
        let untagged = Contact::new("+1");
        for tag in ["", "   "] {
            let filter = RecipientFilter::Tag { tag: tag.into() };
            assert!(filter.matches(&untagged, now));
            assert_eq!(filter.normalized(), RecipientFilter::All);
        }

        let padded = RecipientFilter::Tag { tag: " vip ".into() };
        let vip = Contact::new("+2").with_tags(vec!["vip".into()]);
        assert!(padded.matches(&vip, now));
        assert_eq!(padded.normalized(), RecipientFilter::Tag { tag: "vip".into() });
    }
}
