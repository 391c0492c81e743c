//! User identity: a real authenticated principal or the local guest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed owner id for all guest-mode data
pub const GUEST_USER_ID: &str = "guest_user";

/// Fabricated profile stored while the app runs in guest mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl GuestProfile {
    pub fn new() -> Self {
        Self {
            id: GUEST_USER_ID.to_string(),
            email: "guest@studysync.local".to_string(),
            name: "Guest User".to_string(),
            created_at: Utc::now(),
        }
    }
}

impl Default for GuestProfile {
    fn default() -> Self {
        Self::new()
    }
}

/// The identity whose id scopes cache keys and queued mutations
#[derive(Debug, Clone, PartialEq)]
pub enum UserIdentity {
    Guest(GuestProfile),
    Authenticated { id: String },
}

impl UserIdentity {
    pub fn id(&self) -> &str {
        match self {
            UserIdentity::Guest(profile) => &profile.id,
            UserIdentity::Authenticated { id } => id,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, UserIdentity::Guest(_))
    }
}
