//! Per-source listing extractors.
//!
//! Each extractor is a pure function from raw page content to a normalized
//! [`ListingDraft`]. Fields are located by ordered candidate regex patterns
//! held as data, so a source is tuned by editing its table — and a new source
//! is a wholly new extractor, never a branch inside an existing one.

use std::collections::HashMap;

use regex::RegexBuilder;
use relmon_core::{normalize_status, ListingDraft, ListingFields, Source};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extraction failed: {0}")]
    Pattern(String),
}

/// Ordered candidate patterns for one field. The first pattern that matches
/// wins, regardless of where in the content the match sits.
pub type FieldPatterns = &'static [&'static str];

pub trait SourceExtractor: Send + Sync {
    fn source(&self) -> Source;

    /// Best-effort extraction: a field whose patterns all miss stays `None`;
    /// only a fault inside pattern handling fails the whole call.
    fn extract(&self, content: &str) -> Result<ListingDraft, ExtractError>;
}

pub fn extractor_for(source: Source) -> &'static dyn SourceExtractor {
    match source {
        Source::UtahRealEstate => &UtahRealEstateExtractor,
        Source::Zillow => &ZillowExtractor,
    }
}

fn compile(pattern: &str) -> Result<regex::Regex, ExtractError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ExtractError::Pattern(format!("pattern {pattern:?}: {e}")))
}

/// Try each candidate pattern in order; the first one that matches decides
/// the field (a match with empty captured text still ends the scan).
fn first_capture(content: &str, patterns: FieldPatterns) -> Result<Option<String>, ExtractError> {
    for pattern in patterns {
        let re = compile(pattern)?;
        if let Some(caps) = re.captures(content) {
            let text = caps.get(1).map_or("", |m| m.as_str()).trim().to_string();
            return Ok(if text.is_empty() { None } else { Some(text) });
        }
    }
    Ok(None)
}

/// Street + locality join: both present joined with ", ", either alone
/// as-is, neither stays empty.
fn join_address(street: Option<String>, locality: Option<String>) -> Option<String> {
    match (street, locality) {
        (Some(s), Some(l)) => Some(format!("{s}, {l}")),
        (Some(s), None) => Some(s),
        (None, Some(l)) => Some(l),
        (None, None) => None,
    }
}

/// UtahRealEstate.com report pages: server-rendered HTML with a structured
/// "facts" key/value block plus free-form markup around it.
#[derive(Debug, Clone, Copy)]
pub struct UtahRealEstateExtractor;

mod utah {
    use super::FieldPatterns;

    pub const PRICE: FieldPatterns = &[r"\$?([1-9]\d{2}(?:,?\d{3}){1,2}(?:,\d{3})?)"];
    pub const STREET: FieldPatterns = &[r"<h2[^>]*>([^<]+)</h2>"];
    pub const LOCALITY: FieldPatterns = &[r#"<div[^>]*id=["']location-data["'][^>]*>([^<]+)</div>"#];
    pub const AGENT_NAME: FieldPatterns =
        &[r#"<a[^>]*href=["']/roster/agent\.listings\.report\.public/agentid/\d+[^>]*>([^<]+)</a>"#];
    pub const AGENT_PHOTO: FieldPatterns =
        &[r#"<img[^>]*src=["'](https://webdrive\.utahrealestate\.com/[^\s"']+?\.jpg)["'][^>]*alt=["'][^"']+?["']"#];
    pub const CONTACT_SECTION: FieldPatterns =
        &[r#"<h2>Contact Agent</h2>([\s\S]*?)<div[^>]*class=["'][^"']*broker-overview-table"#];
    pub const PHONE: FieldPatterns = &[r"(\d{3}[-\s]?\d{3}[-\s]?\d{4})"];
    pub const AGENT_EMAIL: FieldPatterns = &[r#"<a[^>]*href=["']mailto:([^"']+)["'][^>]*>"#];
    pub const BROKERAGE_SECTION: FieldPatterns =
        &[r#"<div[^>]*class=["'][^"']*broker-overview-content[^"']*["'][^>]*>([\s\S]*?)</div>"#];
    pub const BROKERAGE_NAME: FieldPatterns = &[r"<strong>([^<]+)</strong>"];
    pub const FACT: &str =
        r#"<span[^>]*class=["'][^"']*facts-header[^"']*["'][^>]*>(.*?)</span>\s*["']?([^"'<]+)["']?"#;
    pub const BEDS: FieldPatterns = &[r"(\d+)\s*(?:bed|bd|bedroom)"];
    pub const BATHS: FieldPatterns = &[r"(\d+(?:\.\d+)?)\s*(?:bath|ba|bathroom)"];
    pub const SQFT: FieldPatterns = &[r"([0-9,]+)\s*(?:sq\.?\s*ft|sqft|square feet)"];
}

/// Scan the facts block into a label -> value map. Labels repeat on some
/// pages; the last occurrence wins.
fn collect_facts(content: &str) -> Result<HashMap<String, String>, ExtractError> {
    let re = compile(utah::FACT)?;
    let mut facts = HashMap::new();
    for caps in re.captures_iter(content) {
        let label = caps.get(1).map_or("", |m| m.as_str()).trim();
        let value = caps.get(2).map_or("", |m| m.as_str()).trim();
        if !label.is_empty() && !value.is_empty() {
            facts.insert(label.to_string(), value.to_string());
        }
    }
    Ok(facts)
}

impl SourceExtractor for UtahRealEstateExtractor {
    fn source(&self) -> Source {
        Source::UtahRealEstate
    }

    fn extract(&self, content: &str) -> Result<ListingDraft, ExtractError> {
        let mut fields = ListingFields::default();

        fields.price = first_capture(content, utah::PRICE)?.map(|p| format!("${p}"));

        let street = first_capture(content, utah::STREET)?;
        let locality = first_capture(content, utah::LOCALITY)?
            .map(|l| l.trim_start_matches(',').trim().to_string())
            .filter(|l| !l.is_empty());
        fields.address = join_address(street, locality);

        fields.agent_name = first_capture(content, utah::AGENT_NAME)?;
        fields.agent_photo = first_capture(content, utah::AGENT_PHOTO)?;
        if let Some(section) = first_capture(content, utah::CONTACT_SECTION)? {
            fields.agent_phone = first_capture(&section, utah::PHONE)?;
        }
        fields.agent_email = first_capture(content, utah::AGENT_EMAIL)?;
        if let Some(section) = first_capture(content, utah::BROKERAGE_SECTION)? {
            fields.brokerage = first_capture(&section, utah::BROKERAGE_NAME)?;
        }

        let facts = collect_facts(content)?;
        let status = facts.get("Status").map(|raw| normalize_status(raw));
        fields.mls = facts.get("MLS#").cloned();
        fields.property_type = facts.get("Type").cloned();
        fields.year_built = facts.get("Year Built").cloned();
        fields.days_on_market = facts
            .get("Days on URE")
            .or_else(|| facts.get("Days on Market"))
            .cloned();

        fields.beds = first_capture(content, utah::BEDS)?;
        fields.baths = first_capture(content, utah::BATHS)?;
        fields.sqft = first_capture(content, utah::SQFT)?;

        Ok(ListingDraft { status, fields })
    }
}

/// Zillow.com detail pages: the useful state lives in embedded JSON blobs,
/// so most patterns scan for JSON keys rather than markup.
#[derive(Debug, Clone, Copy)]
pub struct ZillowExtractor;

mod zillow {
    use super::FieldPatterns;

    pub const STATUS: FieldPatterns = &[
        r#""homeStatus"\s*:\s*"([^"]+)""#,
        r#"<span[^>]*data-test(?:id)?=["']?(?:listing-)?status["']?[^>]*>([^<]+)</span>"#,
        r#""availability"\s*:\s*"([^"]+)""#,
    ];
    pub const PRICE: FieldPatterns = &[
        r#"<span[^>]*data-testid=["']price["'][^>]*>\$?([0-9,]+)"#,
        r#""price"\s*:\s*([0-9]+)"#,
    ];
    pub const BEDS: FieldPatterns = &[r#""bedrooms"\s*:\s*(\d+)"#];
    pub const BATHS: FieldPatterns = &[r#""bathrooms"\s*:\s*([\d.]+)"#];
    pub const SQFT: FieldPatterns = &[r#""livingArea"\s*:\s*([0-9,]+)"#];
    pub const ADDRESS: FieldPatterns = &[
        r"<h1[^>]*>([^<]+)</h1>",
        r#""address"\s*:\s*"([^"]+)""#,
    ];
    pub const YEAR_BUILT: FieldPatterns = &[r#""yearBuilt"\s*:\s*(\d{4})"#];
    pub const MLS: FieldPatterns = &[r"MLS[#\s]*:?\s*([A-Z0-9\-]+)"];
    pub const PROPERTY_TYPE: FieldPatterns = &[r#""homeType"\s*:\s*"([^"]+)""#];
    pub const AGENT_NAME: FieldPatterns = &[r#""attributionInfo"[^}]*"agentName"\s*:\s*"([^"]+)""#];
    pub const AGENT_PHONE: FieldPatterns =
        &[r#""attributionInfo"[^}]*"agentPhoneNumber"\s*:\s*"([^"]+)""#];
    pub const BROKERAGE: FieldPatterns =
        &[r#""attributionInfo"[^}]*"brokerageName"\s*:\s*"([^"]+)""#];
}

impl SourceExtractor for ZillowExtractor {
    fn source(&self) -> Source {
        Source::Zillow
    }

    fn extract(&self, content: &str) -> Result<ListingDraft, ExtractError> {
        let mut fields = ListingFields::default();

        let status = first_capture(content, zillow::STATUS)?.map(|raw| normalize_status(&raw));

        fields.price = first_capture(content, zillow::PRICE)?.map(|p| format!("${p}"));
        fields.beds = first_capture(content, zillow::BEDS)?;
        fields.baths = first_capture(content, zillow::BATHS)?;
        fields.sqft = first_capture(content, zillow::SQFT)?;
        fields.address = first_capture(content, zillow::ADDRESS)?;
        fields.year_built = first_capture(content, zillow::YEAR_BUILT)?;
        fields.mls = first_capture(content, zillow::MLS)?;
        fields.property_type = first_capture(content, zillow::PROPERTY_TYPE)?;
        fields.agent_name = first_capture(content, zillow::AGENT_NAME)?;
        fields.agent_phone = first_capture(content, zillow::AGENT_PHONE)?;
        fields.brokerage = first_capture(content, zillow::BROKERAGE)?;

        Ok(ListingDraft { status, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_pattern_in_the_table_wins_over_a_later_match_position() {
        // The span (pattern 2) appears first in the content, but the JSON
        // key (pattern 1) is ordered first in the table and must win.
        let content = r#"
            <span data-test="status">Off Market</span>
            <script>{"homeStatus":"PENDING"}</script>
        "#;
        let draft = ZillowExtractor.extract(content).unwrap();
        assert_eq!(draft.status.as_deref(), Some("Pending"));
    }

    #[test]
    fn fallback_pattern_is_used_when_the_first_misses() {
        let content = r#"<span data-testid="status">FOR_SALE</span>"#;
        let draft = ZillowExtractor.extract(content).unwrap();
        assert_eq!(draft.status.as_deref(), Some("For Sale"));
    }

    #[test]
    fn missing_status_token_leaves_status_unset() {
        let draft = ZillowExtractor.extract("<html><body>nothing</body></html>").unwrap();
        assert_eq!(draft.status, None);
        assert_eq!(draft.canonical_status(), relmon_core::STATUS_NOT_FOUND);
    }

    #[test]
    fn one_missing_field_does_not_fail_the_extraction() {
        let content = r#"{"homeStatus":"SOLD","bedrooms":3}"#;
        let draft = ZillowExtractor.extract(content).unwrap();
        assert_eq!(draft.status.as_deref(), Some("Sold"));
        assert_eq!(draft.fields.beds.as_deref(), Some("3"));
        assert_eq!(draft.fields.price, None);
        assert_eq!(draft.fields.address, None);
    }

    #[test]
    fn utah_price_keeps_currency_formatting() {
        let content = "<p>Listed at $450,000 today</p>";
        let draft = UtahRealEstateExtractor.extract(content).unwrap();
        assert_eq!(draft.fields.price.as_deref(), Some("$450,000"));
    }

    #[test]
    fn utah_address_joins_street_and_locality() {
        let content = r#"
            <h2>123 Main St</h2>
            <div id="location-data">, Springfield, UT 84000</div>
        "#;
        let draft = UtahRealEstateExtractor.extract(content).unwrap();
        assert_eq!(
            draft.fields.address.as_deref(),
            Some("123 Main St, Springfield, UT 84000")
        );
    }

    #[test]
    fn utah_address_uses_either_half_alone() {
        let street_only = UtahRealEstateExtractor.extract("<h2>123 Main St</h2>").unwrap();
        assert_eq!(street_only.fields.address.as_deref(), Some("123 Main St"));

        let locality_only = UtahRealEstateExtractor
            .extract(r#"<div id="location-data">Springfield, UT</div>"#)
            .unwrap();
        assert_eq!(locality_only.fields.address.as_deref(), Some("Springfield, UT"));

        let neither = UtahRealEstateExtractor.extract("<p>no address here</p>").unwrap();
        assert_eq!(neither.fields.address, None);
    }

    #[test]
    fn utah_facts_block_feeds_status_and_details() {
        let content = r#"
            <span class="facts-header">Status</span> Active
            <span class="facts-header">MLS#</span> 2053078
            <span class="facts-header">Type</span> Single Family
            <span class="facts-header">Year Built</span> 1998
            <span class="facts-header">Days on URE</span> 12
        "#;
        let draft = UtahRealEstateExtractor.extract(content).unwrap();
        assert_eq!(draft.status.as_deref(), Some("For Sale"));
        assert_eq!(draft.fields.mls.as_deref(), Some("2053078"));
        assert_eq!(draft.fields.property_type.as_deref(), Some("Single Family"));
        assert_eq!(draft.fields.year_built.as_deref(), Some("1998"));
        assert_eq!(draft.fields.days_on_market.as_deref(), Some("12"));
    }

    #[test]
    fn utah_days_on_market_falls_back_when_days_on_ure_is_absent() {
        let content = r#"<span class="facts-header">Days on Market</span> 45"#;
        let draft = UtahRealEstateExtractor.extract(content).unwrap();
        assert_eq!(draft.fields.days_on_market.as_deref(), Some("45"));
    }

    #[test]
    fn utah_phone_is_only_taken_from_the_contact_section() {
        // A phone-shaped number outside the Contact Agent section is ignored.
        let loose = "<p>call 801-555-0000</p>";
        let draft = UtahRealEstateExtractor.extract(loose).unwrap();
        assert_eq!(draft.fields.agent_phone, None);

        let content = r#"
            <h2>Contact Agent</h2>
            <p>Jane Agent 801-555-0199</p>
            <div class="broker-overview-table">
        "#;
        let draft = UtahRealEstateExtractor.extract(content).unwrap();
        assert_eq!(draft.fields.agent_phone.as_deref(), Some("801-555-0199"));
    }

    #[test]
    fn zillow_unrecognized_status_passes_through() {
        let content = r#"{"homeStatus":"AUCTION"}"#;
        let draft = ZillowExtractor.extract(content).unwrap();
        assert_eq!(draft.status.as_deref(), Some("AUCTION"));
    }

    #[test]
    fn zillow_numeric_price_gets_a_currency_symbol() {
        let content = r#"{"price":525000}"#;
        let draft = ZillowExtractor.extract(content).unwrap();
        assert_eq!(draft.fields.price.as_deref(), Some("$525000"));
    }

    #[test]
    fn extractor_registry_covers_every_source() {
        assert_eq!(
            extractor_for(Source::UtahRealEstate).source(),
            Source::UtahRealEstate
        );
        assert_eq!(extractor_for(Source::Zillow).source(), Source::Zillow);
    }
}
