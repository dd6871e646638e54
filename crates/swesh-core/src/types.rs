use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Clothing size of a listed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSize {
    Xs,
    S,
    M,
    L,
    Xl,
    Xxl,
}

/// Catalog category of a listed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    Tops,
    Bottoms,
    Dresses,
    Outerwear,
    Shoes,
    Accessories,
    Other,
}

/// Wear condition declared by the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCondition {
    New,
    LikeNew,
    Good,
    Fair,
    Worn,
}

/// A user's reaction to someone else's item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    Like,
    Dislike,
    Skip,
}

/// Lifecycle state of a trade proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Matched,
    Cancelled,
    Expired,
}

/// Lifecycle state of a match.  `Completed` and `Archived` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Active,
    Completed,
    Archived,
}

/// How a match came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Two reciprocal likes.
    Tinder,
    /// Two reciprocal explicit proposals.
    Proposal,
}

/// Why an archived match was archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchivalReason {
    UserCancelled,
    ItemExchanged,
    ItemDeleted,
    Admin,
}

/// Per-side confirmation flags of the exchange handshake.
///
/// Side "a"/"b" follow the match's canonical user ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub user_a_confirmed: bool,
    pub user_a_confirmed_at: Option<DateTime<Utc>>,
    pub user_b_confirmed: bool,
    pub user_b_confirmed_at: Option<DateTime<Utc>>,
}

impl Confirmation {
    /// Both sides have confirmed the physical exchange.
    pub fn is_complete(&self) -> bool {
        self.user_a_confirmed && self.user_b_confirmed
    }
}

macro_rules! text_repr {
    ($ty:ty { $($variant:path => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Stable text form, used both on the wire and in SQLite columns.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($variant => $text),+
                }
            }

            /// Parse the stable text form back into the enum.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($variant)),+,
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_repr!(ItemSize {
    ItemSize::Xs => "xs",
    ItemSize::S => "s",
    ItemSize::M => "m",
    ItemSize::L => "l",
    ItemSize::Xl => "xl",
    ItemSize::Xxl => "xxl",
});

text_repr!(ItemCategory {
    ItemCategory::Tops => "tops",
    ItemCategory::Bottoms => "bottoms",
    ItemCategory::Dresses => "dresses",
    ItemCategory::Outerwear => "outerwear",
    ItemCategory::Shoes => "shoes",
    ItemCategory::Accessories => "accessories",
    ItemCategory::Other => "other",
});

text_repr!(ItemCondition {
    ItemCondition::New => "new",
    ItemCondition::LikeNew => "like_new",
    ItemCondition::Good => "good",
    ItemCondition::Fair => "fair",
    ItemCondition::Worn => "worn",
});

text_repr!(InteractionAction {
    InteractionAction::Like => "like",
    InteractionAction::Dislike => "dislike",
    InteractionAction::Skip => "skip",
});

text_repr!(ProposalStatus {
    ProposalStatus::Pending => "pending",
    ProposalStatus::Matched => "matched",
    ProposalStatus::Cancelled => "cancelled",
    ProposalStatus::Expired => "expired",
});

text_repr!(MatchStatus {
    MatchStatus::Active => "active",
    MatchStatus::Completed => "completed",
    MatchStatus::Archived => "archived",
});

text_repr!(MatchType {
    MatchType::Tinder => "tinder",
    MatchType::Proposal => "proposal",
});

text_repr!(ArchivalReason {
    ArchivalReason::UserCancelled => "user_cancelled",
    ArchivalReason::ItemExchanged => "item_exchanged",
    ArchivalReason::ItemDeleted => "item_deleted",
    ArchivalReason::Admin => "admin",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trips() {
        for status in [
            MatchStatus::Active,
            MatchStatus::Completed,
            MatchStatus::Archived,
        ] {
            assert_eq!(MatchStatus::parse(status.as_str()), Some(status));
        }
        for reason in [
            ArchivalReason::UserCancelled,
            ArchivalReason::ItemExchanged,
            ArchivalReason::ItemDeleted,
            ArchivalReason::Admin,
        ] {
            assert_eq!(ArchivalReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(MatchStatus::parse("???"), None);
    }

    #[test]
    fn serde_matches_text_form() {
        // The wire form and the column form must agree, otherwise a value
        // written by serde could not be read back by the row mappers.
        let json = serde_json::to_string(&ItemCondition::LikeNew).unwrap();
        assert_eq!(json, "\"like_new\"");
        assert_eq!(ItemCondition::parse("like_new"), Some(ItemCondition::LikeNew));
    }

    #[test]
    fn confirmation_completeness() {
        let mut c = Confirmation::default();
        assert!(!c.is_complete());
        c.user_a_confirmed = true;
        assert!(!c.is_complete());
        c.user_b_confirmed = true;
        assert!(c.is_complete());
    }
}
