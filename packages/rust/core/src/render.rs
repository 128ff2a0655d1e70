//! Markdown template renderer.
//!
//! Templates are `<templates_dir>/<template-id>.md` files. Text placeholders
//! are `{{canonicalFieldKey}}`; image placeholders are markdown images whose
//! alt text is the description tag, e.g. `![logo](placeholder)`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use tracing::info;

use orgbrief_shared::{OrgBriefError, Result};

use crate::collaborators::{ReportFields, ReportRenderer};

static FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid regex"));

static LEFTOVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{.*?\}\}").expect("valid regex"));

static IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").expect("valid regex"));

/// Substitute `fields` into a template body.
///
/// Images whose tag has no supplied asset are removed; placeholders with no
/// matching field are blanked.
pub fn fill_template(template: &str, fields: &ReportFields) -> String {
    let with_images = IMAGE_RE.replace_all(template, |caps: &Captures| {
        let tag = caps[1].trim();
        match fields.images.get(tag) {
            Some(locator) => format!("![{tag}]({locator})"),
            None => String::new(),
        }
    });

    let with_text = FIELD_RE.replace_all(&with_images, |caps: &Captures| {
        let key = &caps[1];
        if key == "title" {
            return fields.title.clone();
        }
        fields.text.get(key).cloned().unwrap_or_default()
    });

    LEFTOVER_RE.replace_all(&with_text, "").into_owned()
}

/// File-name-safe slug of a display name.
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "report".into()
    } else {
        trimmed.to_string()
    }
}

/// Renders markdown templates into an output directory.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    templates_dir: PathBuf,
    output_dir: PathBuf,
}

impl TemplateRenderer {
    pub fn new(templates_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    fn template_path(&self, template_id: &str) -> Result<PathBuf> {
        let valid = !template_id.is_empty()
            && template_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(OrgBriefError::validation(format!(
                "invalid template id '{template_id}'"
            )));
        }
        Ok(self.templates_dir.join(format!("{template_id}.md")))
    }
}

#[async_trait]
impl ReportRenderer for TemplateRenderer {
    async fn render_report(&self, template_id: &str, fields: &ReportFields) -> Result<String> {
        let path = self.template_path(template_id)?;
        let template = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OrgBriefError::not_found(format!("template '{template_id}'"))
            } else {
                OrgBriefError::io(&path, e)
            }
        })?;

        let body = fill_template(&template, fields);

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| OrgBriefError::io(&self.output_dir, e))?;
        let out = self
            .output_dir
            .join(format!("{}-{template_id}.md", slug(&fields.title)));
        tokio::fs::write(&out, body)
            .await
            .map_err(|e| OrgBriefError::Render(format!("{}: {e}", out.display())))?;

        info!(path = %out.display(), "report rendered");
        Ok(out.to_string_lossy().into_owned())
    }
}

/// Built-in template written by `orgbrief config init`.
pub const DEFAULT_TEMPLATE: &str = r#"# {{title}}

![logo](logo) ![flag](flag)

**Website:** {{website}} | **Sector:** {{sector}} | **Location:** {{location}}

## Summary
{{companySummary}}

**Business model:** {{businessModel}}

## Key Differentiators
{{keyDifferentiators}}

## Metrics
| Metric | Value |
|---|---|
| Valuation | {{currentValuation}} |
| ARR | {{arr}} |
| Gross profit | {{grossProfit}} |
| Runway | {{cashRunway}} |
| Employees | {{employeeCount}} |
| Customers | {{customerCount}} |
| Retention | {{retention}} |

## Funding
| | |
|---|---|
| Total raised | {{totalCapitalRaised}} |
| Initial investment | {{initialInvestment}} |
| Lead investor | {{leadInvestor}} |
| Last round | {{lastRoundType}} {{lastRoundAmount}} ({{lastRoundDate}}) |
| Currently raising | {{isCurrentlyRaising}} |
| Target / committed | {{targetAmount}} / {{committedAmount}} ({{committedPercent}}) |
| Pre / post money | {{preMoneyValuation}} / {{postMoneyValuation}} |
| Terms | {{terms}} |

## Recent Highlights
{{recentHighlightsAndNews}}

## Strategic Focus
{{strategicFocus}}

## Risks
{{risks}}

## Commentary
{{founderCommentary}}

{{fundCommentary}}
"#;

/// Collect text placeholders present in a template, for diagnostics.
pub fn placeholders(template: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for caps in FIELD_RE.captures_iter(template) {
        *counts.entry(caps[1].to_string()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn fields() -> ReportFields {
        let mut fields = ReportFields {
            title: "Acme Corp".into(),
            ..Default::default()
        };
        fields.text.insert("arr".into(), "$2M".into());
        fields
            .images
            .insert("logo".into(), "https://img.example/acme.png".into());
        fields
    }

    #[test]
    fn substitutes_and_blanks() {
        let out = fill_template("ARR: {{arr}} / Runway: {{ cashRunway }} / {{?weird}}", &fields());
        assert_eq!(out, "ARR: $2M / Runway:  / ");
    }

    #[test]
    fn images_replaced_or_removed() {
        let out = fill_template("![logo](x) ![flag](y)", &fields());
        assert_eq!(out, "![logo](https://img.example/acme.png) ");
    }

    #[test]
    fn slugs_are_filename_safe() {
        assert_eq!(slug("Acme Corp, Inc."), "acme-corp-inc");
        assert_eq!(slug("???"), "report");
    }

    #[test]
    fn default_template_mentions_title() {
        let found = placeholders(DEFAULT_TEMPLATE);
        assert!(found.contains_key("title"));
        assert!(found.contains_key("risks"));
    }

    #[tokio::test]
    async fn renders_to_output_dir() {
        let base = std::env::temp_dir().join(format!("ob_render_{}", Uuid::now_v7()));
        let templates = base.join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(templates.join("brief.md"), "# {{title}}\n{{arr}}\n").unwrap();

        let renderer = TemplateRenderer::new(&templates, base.join("out"));
        let locator = renderer.render_report("brief", &fields()).await.unwrap();
        assert!(locator.ends_with("acme-corp-brief.md"));
        assert_eq!(std::fs::read_to_string(&locator).unwrap(), "# Acme Corp\n$2M\n");

        let err = renderer.render_report("missing", &fields()).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(renderer.render_report("../etc", &fields()).await.is_err());
    }
}
