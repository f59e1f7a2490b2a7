// 🚦 Property Status - lifecycle transition table
// Static adjacency map: current status → statuses it may move to next.
//
// The table only answers yes/no. Callers that persist a status change must
// check `can_transition` first and reject the update themselves.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// PROPERTY STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyStatus {
    /// Created by the landlord, not yet visible to applicants
    Draft,

    /// Visible to applicants
    Listed,

    /// Temporarily hidden from applicants
    Paused,

    /// An application has been accepted
    UnderOffer,

    /// Formal offer sent to the applicant
    OfferMade,

    /// Tenancy in progress
    Let,

    /// Tenancy finished normally
    Ended,

    /// Tenancy terminated on breach
    Breached,

    /// Taken off the market by the landlord
    Withdrawn,
}

impl PropertyStatus {
    /// Every status, in lifecycle order
    pub const ALL: [PropertyStatus; 9] = [
        PropertyStatus::Draft,
        PropertyStatus::Listed,
        PropertyStatus::Paused,
        PropertyStatus::UnderOffer,
        PropertyStatus::OfferMade,
        PropertyStatus::Let,
        PropertyStatus::Ended,
        PropertyStatus::Breached,
        PropertyStatus::Withdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyStatus::Draft => "draft",
            PropertyStatus::Listed => "listed",
            PropertyStatus::Paused => "paused",
            PropertyStatus::UnderOffer => "under_offer",
            PropertyStatus::OfferMade => "offer_made",
            PropertyStatus::Let => "let",
            PropertyStatus::Ended => "ended",
            PropertyStatus::Breached => "breached",
            PropertyStatus::Withdrawn => "withdrawn",
        }
    }

    /// Human-readable label for pages
    pub fn label(&self) -> &'static str {
        match self {
            PropertyStatus::Draft => "Draft",
            PropertyStatus::Listed => "Listed",
            PropertyStatus::Paused => "Paused",
            PropertyStatus::UnderOffer => "Under offer",
            PropertyStatus::OfferMade => "Offer made",
            PropertyStatus::Let => "Let",
            PropertyStatus::Ended => "Ended",
            PropertyStatus::Breached => "Breached",
            PropertyStatus::Withdrawn => "Withdrawn",
        }
    }

    /// Statuses this one may move to next. Empty for terminal statuses.
    pub fn allowed_next(&self) -> &'static [PropertyStatus] {
        use PropertyStatus::*;

        match self {
            Draft => &[Listed, Withdrawn],
            Listed => &[Paused, UnderOffer, Withdrawn],
            Paused => &[Listed, Withdrawn],
            UnderOffer => &[OfferMade, Listed],
            OfferMade => &[Let, Listed],
            Let => &[Ended, Breached],
            Ended | Breached | Withdrawn => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }
}

impl fmt::Display for PropertyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown property status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for PropertyStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PropertyStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

// ============================================================================
// TRANSITION CHECKS
// ============================================================================

/// True iff `to` is in the allowed-next set of `from`.
///
/// Self-transitions are never allowed unless listed in the table (none are).
pub fn can_transition(from: PropertyStatus, to: PropertyStatus) -> bool {
    from.allowed_next().contains(&to)
}

/// String form of [`can_transition`] for untyped input (form posts, CSV).
/// Any value outside the enumeration yields `false`.
pub fn can_transition_str(from: &str, to: &str) -> bool {
    match (from.parse::<PropertyStatus>(), to.parse::<PropertyStatus>()) {
        (Ok(from), Ok(to)) => can_transition(from, to),
        _ => false,
    }
}

// ============================================================================
// TESTS
// ============================================================================
