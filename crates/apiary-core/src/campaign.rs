use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Created, not yet planned.
    Draft,
    /// Planning in progress.
    Planning,
    /// Live.
    Active,
    /// Temporarily halted.
    Paused,
    /// Finished.
    Completed,
}

/// A marketing campaign record held in the shared state registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// Unique campaign id.
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Campaign objective, e.g. `"awareness"` or `"conversion"`.
    pub objective: String,
    /// Total budget in cents.
    pub budget_cents: u64,
    /// Distribution channels, e.g. `"search"`, `"social"`.
    pub channels: Vec<String>,
    /// Current status.
    pub status: CampaignStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Create a draft campaign.
    pub fn new(name: impl Into<String>, objective: impl Into<String>, budget_cents: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            objective: objective.into(),
            budget_cents,
            channels: Vec::new(),
            status: CampaignStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a distribution channel.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.push(channel.into());
        self
    }
}

/// Review status of a creative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreativeStatus {
    /// Generated, not yet reviewed.
    Draft,
    /// Under review.
    Review,
    /// Cleared for use.
    Approved,
    /// Rejected in review.
    Rejected,
}

/// A single ad creative belonging to a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creative {
    /// Unique creative id.
    pub id: Uuid,
    /// Owning campaign.
    pub campaign_id: Uuid,
    /// Ad format, e.g. `"search_text"` or `"social_image"`.
    pub format: String,
    /// Headline copy.
    pub headline: String,
    /// Body copy.
    pub body: String,
    /// Current review status.
    pub status: CreativeStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Creative {
    /// Create a draft creative for a campaign.
    pub fn new(
        campaign_id: Uuid,
        format: impl Into<String>,
        headline: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            format: format.into(),
            headline: headline.into(),
            body: body.into(),
            status: CreativeStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }
}
