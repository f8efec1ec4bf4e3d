//! Core domain model for relmon: sources, status vocabulary, the identifier
//! resolver, and the persisted tracked-listing record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Sentinel persisted when an extractor located no raw status token at all.
/// Distinct from a status that was recognized as empty.
pub const STATUS_NOT_FOUND: &str = "Status Not Found";

/// Closed canonical vocabulary produced by [`normalize_status`].
pub const CANONICAL_STATUSES: [&str; 7] = [
    "For Sale",
    "Off Market",
    "Pending",
    "Contingent",
    "Sold",
    "Coming Soon",
    "For Rent",
];

/// URL prefix the primary source serves listing reports from. A bare MLS
/// number resolves by appending its digits.
pub const UTAH_REPORT_URL: &str = "https://www.utahrealestate.com/report/";

/// Supported listing websites. Each source has its own URL shape and its own
/// extractor in `relmon-adapters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    UtahRealEstate,
    Zillow,
}

impl Source {
    pub fn display_name(&self) -> &'static str {
        match self {
            Source::UtahRealEstate => "UtahRealEstate.com",
            Source::Zillow => "Zillow.com",
        }
    }

    /// Detect the source from a listing URL by host containment.
    pub fn from_url(url: &str) -> Option<Source> {
        if url.contains("utahrealestate.com") {
            Some(Source::UtahRealEstate)
        } else if url.contains("zillow.com") {
            Some(Source::Zillow)
        } else {
            None
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Normalize a raw source status token into the canonical vocabulary.
///
/// Unrecognized non-empty input passes through unchanged; callers must not
/// assume membership in [`CANONICAL_STATUSES`]. Empty input yields an empty
/// string — substituting [`STATUS_NOT_FOUND`] when no token was located at
/// all is the caller's job.
pub fn normalize_status(raw: &str) -> String {
    let canonical = match raw.trim().to_uppercase().as_str() {
        "FOR_SALE" | "ACTIVE" | "FOR SALE" => "For Sale",
        "OFF_MARKET" | "OFF MARKET" => "Off Market",
        "PENDING" | "UNDER CONTRACT" => "Pending",
        "CONTINGENT" => "Contingent",
        "SOLD" | "CLOSED" => "Sold",
        "COMING_SOON" | "COMING SOON" => "Coming Soon",
        "FOR_RENT" | "FOR RENT" => "For Rent",
        _ => return raw.to_string(),
    };
    canonical.to_string()
}

/// Why a user-supplied identifier could not be resolved to a source URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("unsupported website; use UtahRealEstate.com or Zillow.com")]
    UnsupportedSource,
    #[error("address detected; find the listing URL manually")]
    AddressInput,
    #[error("invalid input; enter a URL or MLS number")]
    InvalidInput,
}

/// Canonical fetch target derived from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub url: String,
    pub source: Source,
}

/// Resolve user input (bare MLS number, `MLS`-prefixed number, or full URL)
/// to a canonical source URL. Purely structural; no network access, and the
/// same input always yields the same output.
pub fn resolve_input(input: &str) -> Result<ResolvedInput, ResolveError> {
    let input = input.trim();

    if input.starts_with("http://") || input.starts_with("https://") {
        return match Source::from_url(input) {
            Some(source) => Ok(ResolvedInput {
                url: input.to_string(),
                source,
            }),
            None => Err(ResolveError::UnsupportedSource),
        };
    }

    if let Some(digits) = mls_digits(input) {
        return Ok(ResolvedInput {
            url: format!("{UTAH_REPORT_URL}{digits}"),
            source: Source::UtahRealEstate,
        });
    }

    if looks_like_address(input) {
        return Err(ResolveError::AddressInput);
    }

    Err(ResolveError::InvalidInput)
}

/// Match a bare or `MLS`-prefixed identifier: 6-10 digits, prefix
/// case-insensitive. Returns the digit run.
fn mls_digits(input: &str) -> Option<&str> {
    let rest = match input.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("mls") => &input[3..],
        _ => input,
    };
    let is_digits = (6..=10).contains(&rest.len()) && rest.bytes().all(|b| b.is_ascii_digit());
    is_digits.then_some(rest)
}

/// Street-address heuristic: leading digit, then a letter, then a comma.
/// Addresses are refused outright rather than geocoded.
fn looks_like_address(input: &str) -> bool {
    let mut chars = input.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }
    let mut seen_letter = false;
    for c in chars {
        if c.is_alphabetic() {
            seen_letter = true;
        } else if c == ',' && seen_letter {
            return true;
        }
    }
    false
}

/// Normalized extracted attributes for one listing. Every field is
/// best-effort: `None` means the extractor ran and found nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingFields {
    pub price: Option<String>,
    pub beds: Option<String>,
    pub baths: Option<String>,
    pub sqft: Option<String>,
    pub address: Option<String>,
    pub mls: Option<String>,
    pub days_on_market: Option<String>,
    pub year_built: Option<String>,
    pub property_type: Option<String>,
    pub agent_name: Option<String>,
    pub agent_photo: Option<String>,
    pub agent_phone: Option<String>,
    pub agent_email: Option<String>,
    pub brokerage: Option<String>,
    pub features: Option<String>,
}

/// Stable field names, in display order. External consumers (the CRM mapping
/// layer, CSV export) select fields by these names.
pub const FIELD_NAMES: [&str; 15] = [
    "price",
    "beds",
    "baths",
    "sqft",
    "address",
    "mls",
    "days_on_market",
    "year_built",
    "property_type",
    "agent_name",
    "agent_photo",
    "agent_phone",
    "agent_email",
    "brokerage",
    "features",
];

impl ListingFields {
    /// Look up a field value by its stable name. Unknown names yield `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "price" => self.price.as_deref(),
            "beds" => self.beds.as_deref(),
            "baths" => self.baths.as_deref(),
            "sqft" => self.sqft.as_deref(),
            "address" => self.address.as_deref(),
            "mls" => self.mls.as_deref(),
            "days_on_market" => self.days_on_market.as_deref(),
            "year_built" => self.year_built.as_deref(),
            "property_type" => self.property_type.as_deref(),
            "agent_name" => self.agent_name.as_deref(),
            "agent_photo" => self.agent_photo.as_deref(),
            "agent_phone" => self.agent_phone.as_deref(),
            "agent_email" => self.agent_email.as_deref(),
            "brokerage" => self.brokerage.as_deref(),
            "features" => self.features.as_deref(),
            _ => None,
        }
    }
}

/// Extractor output for one fetched page: the attribute set plus the status
/// token located on the page, already normalized. `status: None` means no
/// raw token was found anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub status: Option<String>,
    pub fields: ListingFields,
}

impl ListingDraft {
    /// Status value to persist: the located token or the not-found sentinel.
    pub fn canonical_status(&self) -> String {
        self.status
            .clone()
            .unwrap_or_else(|| STATUS_NOT_FOUND.to_string())
    }
}

/// The persisted unit: one property under monitoring.
///
/// `input_text` is set once at creation and never mutated; every refresh
/// re-resolves from it. `previous_status` and `last_changed_at` move together
/// and only on a genuine status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedListing {
    pub id: Uuid,
    pub input_text: String,
    pub source: Source,
    pub resolved_url: String,
    pub canonical_status: String,
    pub previous_status: Option<String>,
    pub fields: ListingFields,
    pub last_checked_at: DateTime<Utc>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub external_sync_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TrackedListing {
    /// Label shown for this listing in progress reporting and error lists:
    /// the extracted address when present, else the original input.
    pub fn display_label(&self) -> &str {
        self.fields.address.as_deref().unwrap_or(&self.input_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_mls_number_resolves_to_primary_report_url() {
        let resolved = resolve_input("2053078").unwrap();
        assert_eq!(resolved.source, Source::UtahRealEstate);
        assert_eq!(resolved.url, "https://www.utahrealestate.com/report/2053078");
    }

    #[test]
    fn mls_prefix_is_case_insensitive_and_resolves_identically() {
        let bare = resolve_input("2053078").unwrap();
        assert_eq!(resolve_input("MLS2053078").unwrap(), bare);
        assert_eq!(resolve_input("mls2053078").unwrap(), bare);
    }

    #[test]
    fn resolution_is_idempotent() {
        for input in ["2053078", "MLS2053078", "https://www.zillow.com/homedetails/x", "junk"] {
            assert_eq!(resolve_input(input), resolve_input(input));
        }
    }

    #[test]
    fn known_host_urls_pass_through_as_given() {
        let url = "https://www.utahrealestate.com/report/2053078";
        let resolved = resolve_input(url).unwrap();
        assert_eq!(resolved.url, url);
        assert_eq!(resolved.source, Source::UtahRealEstate);

        let url = "https://www.zillow.com/homedetails/123-Main-St/456_zpid/";
        let resolved = resolve_input(url).unwrap();
        assert_eq!(resolved.source, Source::Zillow);
    }

    #[test]
    fn unknown_host_is_rejected() {
        assert_eq!(
            resolve_input("https://www.realtor.com/property/1"),
            Err(ResolveError::UnsupportedSource)
        );
    }

    #[test]
    fn street_address_is_refused_not_geocoded() {
        assert_eq!(
            resolve_input("123 Main St, Springfield"),
            Err(ResolveError::AddressInput)
        );
    }

    #[test]
    fn garbage_input_is_invalid() {
        assert_eq!(resolve_input("not-a-listing"), Err(ResolveError::InvalidInput));
        assert_eq!(resolve_input(""), Err(ResolveError::InvalidInput));
        // Too few and too many digits fall outside the 6-10 range.
        assert_eq!(resolve_input("12345"), Err(ResolveError::InvalidInput));
        assert_eq!(resolve_input("12345678901"), Err(ResolveError::InvalidInput));
    }

    #[test]
    fn whitespace_is_trimmed_before_matching() {
        let resolved = resolve_input("  2053078  ").unwrap();
        assert_eq!(resolved.url, "https://www.utahrealestate.com/report/2053078");
    }

    #[test]
    fn recognized_tokens_collapse_into_the_closed_set() {
        let cases = [
            ("FOR_SALE", "For Sale"),
            ("active", "For Sale"),
            ("  For Sale ", "For Sale"),
            ("OFF_MARKET", "Off Market"),
            ("under contract", "Pending"),
            ("PENDING", "Pending"),
            ("Contingent", "Contingent"),
            ("CLOSED", "Sold"),
            ("sold", "Sold"),
            ("COMING_SOON", "Coming Soon"),
            ("for rent", "For Rent"),
        ];
        for (raw, expected) in cases {
            let normalized = normalize_status(raw);
            assert_eq!(normalized, expected, "raw token {raw:?}");
            assert!(CANONICAL_STATUSES.contains(&normalized.as_str()));
        }
    }

    #[test]
    fn unrecognized_tokens_pass_through_unchanged() {
        assert_eq!(normalize_status("Auction"), "Auction");
        assert_eq!(normalize_status("pre-foreclosure"), "pre-foreclosure");
        assert_eq!(normalize_status(""), "");
    }

    #[test]
    fn draft_without_status_token_persists_the_sentinel() {
        let draft = ListingDraft::default();
        assert_eq!(draft.canonical_status(), STATUS_NOT_FOUND);

        let draft = ListingDraft {
            status: Some("Pending".to_string()),
            ..Default::default()
        };
        assert_eq!(draft.canonical_status(), "Pending");
    }

    #[test]
    fn every_stable_name_round_trips_through_get() {
        let fields = ListingFields {
            price: Some("$450,000".into()),
            beds: Some("3".into()),
            baths: Some("2.5".into()),
            sqft: Some("1,850".into()),
            address: Some("123 Main St, Springfield".into()),
            mls: Some("2053078".into()),
            days_on_market: Some("12".into()),
            year_built: Some("1998".into()),
            property_type: Some("Single Family".into()),
            agent_name: Some("Jane Agent".into()),
            agent_photo: Some("https://example.com/jane.jpg".into()),
            agent_phone: Some("801-555-0199".into()),
            agent_email: Some("jane@example.com".into()),
            brokerage: Some("Example Realty".into()),
            features: Some("corner lot".into()),
        };
        for name in FIELD_NAMES {
            assert!(fields.get(name).is_some(), "field {name} not exposed");
        }
        assert_eq!(fields.get("price"), Some("$450,000"));
        assert_eq!(fields.get("no_such_field"), None);
    }
}
