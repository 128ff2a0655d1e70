//! The unified field schema.
//!
//! One [`UnifiedFieldSchema`] value is built (or loaded from storage) at
//! startup and handed to every component that reads or writes fields.
//! Nothing mutates it while the pipeline runs.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OrgBriefError, Result};

/// Field key the report stage writes the rendered report locator to.
pub const REPORT_LINK_KEY: &str = "reportLink";

/// Sub-partition of the schema scoped to one extraction round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageGroup {
    GeneralInfo,
    Metrics,
    Funding,
}

impl StageGroup {
    pub const ALL: [StageGroup; 3] = [
        StageGroup::GeneralInfo,
        StageGroup::Metrics,
        StageGroup::Funding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeneralInfo => "generalInfo",
            Self::Metrics => "metrics",
            Self::Funding => "funding",
        }
    }
}

impl fmt::Display for StageGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of one canonical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    /// Canonical key, stable across every stage and partition.
    pub key: String,
    /// Column header used for this field in every partition.
    pub label: String,
    /// Bracket tag the model uses to mark this field in free text.
    pub tag: String,
    /// Instruction fragment sent to the completion service.
    #[serde(default)]
    pub prompt: String,
    /// Whether the field holds a list of described items.
    #[serde(default)]
    pub multi_valued: bool,
    /// Enrichment group; `None` for fields no extraction round trip produces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<StageGroup>,
    /// Identity fields are copied verbatim into the final partition.
    #[serde(default)]
    pub identity: bool,
    /// Yes/No field.
    #[serde(default)]
    pub boolean: bool,
}

impl FieldSpec {
    fn grouped(key: &str, label: &str, tag: &str, prompt: &str, group: StageGroup) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            tag: tag.into(),
            prompt: prompt.into(),
            multi_valued: false,
            group: Some(group),
            identity: false,
            boolean: false,
        }
    }

    fn identity(key: &str, label: &str) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            tag: key.to_uppercase(),
            prompt: String::new(),
            multi_valued: false,
            group: None,
            identity: true,
            boolean: false,
        }
    }

    fn multi(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    fn yes_no(mut self) -> Self {
        self.boolean = true;
        self
    }
}

/// Canonical field key → label, prompt, cardinality and stage group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedFieldSchema {
    fields: Vec<FieldSpec>,
}

impl UnifiedFieldSchema {
    /// Build a schema, rejecting duplicate or empty keys.
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for field in &fields {
            if field.key.trim().is_empty() {
                return Err(OrgBriefError::validation("schema field with empty key"));
            }
            if !seen.insert(field.key.as_str()) {
                return Err(OrgBriefError::validation(format!(
                    "duplicate schema field '{}'",
                    field.key
                )));
            }
            if field.identity && field.group.is_some() {
                return Err(OrgBriefError::validation(format!(
                    "identity field '{}' cannot belong to a stage group",
                    field.key
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Parse a schema from its persisted JSON form.
    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: UnifiedFieldSchema = serde_json::from_str(raw)
            .map_err(|e| OrgBriefError::validation(format!("invalid field schema: {e}")))?;
        Self::new(parsed.fields)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| OrgBriefError::validation(format!("cannot serialize schema: {e}")))
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Fields of one stage group, in declaration order.
    pub fn fields_in(&self, group: StageGroup) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(move |f| f.group == Some(group))
    }

    /// Every field that belongs to some stage group.
    pub fn grouped_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.group.is_some())
    }

    pub fn identity_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.identity)
    }

    /// Fields outside every stage group: identity plus reference data such
    /// as the country code. Synthesis copies these verbatim from the sources.
    pub fn ungrouped_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.group.is_none())
    }

    /// The schema shipped with the binary.
    pub fn builtin() -> Self {
        use StageGroup::*;

        let fields = vec![
            FieldSpec::identity("name", "Name"),
            FieldSpec::identity("website", "Website"),
            FieldSpec::identity("sector", "Sector"),
            FieldSpec::identity("location", "Location"),
            FieldSpec {
                key: "countryCode".into(),
                label: "Country Code".into(),
                tag: "COUNTRY_CODE".into(),
                prompt: String::new(),
                multi_valued: false,
                group: None,
                identity: false,
                boolean: false,
            },
            // general info
            FieldSpec::grouped(
                "companySummary",
                "Company Summary",
                "COMPANY_SUMMARY",
                "A 2-3 sentence overview of the company's mission and core product.",
                GeneralInfo,
            ),
            FieldSpec::grouped(
                "businessModel",
                "Business Model",
                "BUSINESS_MODEL",
                "The company's primary business model (e.g., B2B SaaS, Marketplace).",
                GeneralInfo,
            ),
            FieldSpec::grouped(
                "keyDifferentiators",
                "Key Differentiators",
                "KEY_DIFFERENTIATORS",
                "A unique aspect of their technology, partnerships, or market strategy.",
                GeneralInfo,
            )
            .multi(),
            FieldSpec::grouped(
                "recentHighlightsAndNews",
                "Recent Highlights and News",
                "RECENT_HIGHLIGHT_AND_NEWS",
                "A significant recent milestone, product update, or partnership. (Include the date if available).",
                GeneralInfo,
            )
            .multi(),
            FieldSpec::grouped(
                "strategicFocus",
                "Strategic Focus",
                "STRATEGIC_FOCUS",
                "A current strategic priority, such as a fundraising goal or product launch.",
                GeneralInfo,
            ),
            FieldSpec::grouped(
                "risks",
                "Risks",
                "RISK",
                "A potential risk or challenge facing the company.",
                GeneralInfo,
            )
            .multi(),
            FieldSpec::grouped(
                "founderCommentary",
                "Founder Commentary",
                "FOUNDER_COMMENTARY",
                "A direct quote or paraphrased statement from a founder.",
                GeneralInfo,
            )
            .multi(),
            FieldSpec::grouped(
                "fundCommentary",
                "Fund Commentary",
                "FUND_COMMENTARY",
                "A direct quote or paraphrased statement from an investment fund about the company.",
                GeneralInfo,
            )
            .multi(),
            // metrics
            FieldSpec::grouped(
                "currentValuation",
                "Current Valuation",
                "CURRENT_VALUATION",
                "The most recent valuation.",
                Metrics,
            ),
            FieldSpec::grouped(
                "arr",
                "ARR (Annual Recurring Revenue)",
                "ANNUAL_RECURRING_REVENUE",
                "Annual recurring revenue with its period and currency.",
                Metrics,
            ),
            FieldSpec::grouped(
                "grossProfit",
                "Gross Profit",
                "GROSS_PROFIT",
                "Gross profit or gross margin with its period.",
                Metrics,
            ),
            FieldSpec::grouped(
                "cashRunway",
                "Runway",
                "CASH_RUNWAY",
                "Months of cash runway.",
                Metrics,
            ),
            FieldSpec::grouped(
                "employeeCount",
                "Employee Count",
                "EMPLOYEE_COUNT",
                "Specify if the number is approximate, e.g., from LinkedIn.",
                Metrics,
            ),
            FieldSpec::grouped(
                "customerCount",
                "Customer Count",
                "CUSTOMER_COUNT",
                "Specify if the number is a minimum, e.g., \"over 1,000\".",
                Metrics,
            ),
            FieldSpec::grouped(
                "retention",
                "Retention (Customer or Revenue)",
                "RETENTION_RATE",
                "Specify the type, e.g., \"Net Revenue Retention\".",
                Metrics,
            ),
            // funding
            FieldSpec::grouped(
                "totalCapitalRaised",
                "Total Capital Raised",
                "TOTAL_CAPITAL_RAISED",
                "Total capital raised to date.",
                Funding,
            ),
            FieldSpec::grouped(
                "initialInvestment",
                "Initial Investment",
                "INITIAL_INVESTMENT_AMOUNT_AND_TYPE",
                "Amount and instrument of the first investment.",
                Funding,
            ),
            FieldSpec::grouped(
                "leadInvestor",
                "Lead Investor",
                "LAST_ROUND_LEAD_INVESTOR",
                "Lead investor of the last round.",
                Funding,
            ),
            FieldSpec::grouped(
                "lastRoundDate",
                "Last Round: Date",
                "LAST_ROUND_DATE",
                "Closing date of the last round.",
                Funding,
            ),
            FieldSpec::grouped(
                "lastRoundType",
                "Last Round: Type",
                "LAST_ROUND_TYPE",
                "Type of the last round (e.g., Seed, Series A, SAFE).",
                Funding,
            ),
            FieldSpec::grouped(
                "lastRoundAmount",
                "Last Round: Amount",
                "LAST_ROUND_AMOUNT",
                "Amount raised in the last round.",
                Funding,
            ),
            FieldSpec::grouped(
                "isCurrentlyRaising",
                "Currently Raising?",
                "IS_CURRENTLY_RAISING",
                "State \"Yes\" or \"No\" based on available information.",
                Funding,
            )
            .yes_no(),
            FieldSpec::grouped(
                "targetAmount",
                "Current Raise: Target",
                "CURRENT_RAISE_TARGET",
                "Target size of the current raise.",
                Funding,
            ),
            FieldSpec::grouped(
                "committedAmount",
                "Current Raise: Committed",
                "CURRENT_RAISE_COMMITTED",
                "Amount committed so far in the current raise.",
                Funding,
            ),
            FieldSpec::grouped(
                "committedPercent",
                "Current Raise: Committed Percent",
                "CURRENT_RAISE_COMMITTED_PERCENT",
                "Share of the target already committed.",
                Funding,
            ),
            FieldSpec::grouped(
                "preMoneyValuation",
                "Current Raise: Pre Money",
                "CURRENT_RAISE_PRE_MONEY",
                "Pre-money valuation of the current raise.",
                Funding,
            ),
            FieldSpec::grouped(
                "postMoneyValuation",
                "Current Raise: Post Money",
                "CURRENT_RAISE_POST_MONEY",
                "Post-money valuation of the current raise.",
                Funding,
            ),
            FieldSpec::grouped(
                "terms",
                "Current Raise: Terms",
                "CURRENT_RAISE_TERMS",
                "Instrument and notable terms of the current raise.",
                Funding,
            ),
            FieldSpec {
                key: REPORT_LINK_KEY.into(),
                label: "Report Link".into(),
                tag: "REPORT_LINK".into(),
                prompt: String::new(),
                multi_valued: false,
                group: None,
                identity: false,
                boolean: false,
            },
        ];

        Self { fields }
    }
}

impl Default for UnifiedFieldSchema {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_schema_is_valid() {
        let schema = UnifiedFieldSchema::builtin();
        let rebuilt = UnifiedFieldSchema::new(schema.fields().to_vec()).unwrap();
        assert_eq!(rebuilt, schema);
    }

    #[test]
    fn every_group_has_fields() {
        let schema = UnifiedFieldSchema::builtin();
        for group in StageGroup::ALL {
            assert!(schema.fields_in(group).count() > 0, "{group} is empty");
        }
        assert_eq!(schema.fields_in(StageGroup::Metrics).count(), 7);
    }

    #[test]
    fn identity_fields_match_allowlist() {
        let schema = UnifiedFieldSchema::builtin();
        let keys: Vec<_> = schema.identity_fields().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["name", "website", "sector", "location"]);
    }

    #[test]
    fn country_code_is_carried_but_not_identity() {
        let schema = UnifiedFieldSchema::builtin();
        let keys: Vec<_> = schema.ungrouped_fields().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["name", "website", "sector", "location", "countryCode"]);
    }

    #[test]
    fn risks_is_multi_valued_general_info() {
        let schema = UnifiedFieldSchema::builtin();
        let risks = schema.field("risks").unwrap();
        assert!(risks.multi_valued);
        assert_eq!(risks.group, Some(StageGroup::GeneralInfo));
    }

    #[test]
    fn duplicate_keys_rejected() {
        let field = FieldSpec::identity("name", "Name");
        let err = UnifiedFieldSchema::new(vec![field.clone(), field]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn json_roundtrip_preserves_schema() {
        let schema = UnifiedFieldSchema::builtin();
        let json = schema.to_json().unwrap();
        assert_eq!(UnifiedFieldSchema::from_json(&json).unwrap(), schema);
    }
}
