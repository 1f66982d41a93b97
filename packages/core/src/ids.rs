//! ULID-backed identifiers, one newtype per record kind.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Create a new unique ID.
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Parse an ID from its canonical string form.
            pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
                Ok(Self(Ulid::from_string(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

ulid_id!(
    /// Unique identifier for a background job.
    JobId
);
ulid_id!(
    /// Unique identifier for a campaign.
    CampaignId
);
ulid_id!(
    /// Unique identifier for a campaign recipient row.
    RecipientId
);
ulid_id!(
    /// Unique identifier for a contact in the directory.
    ContactId
);
