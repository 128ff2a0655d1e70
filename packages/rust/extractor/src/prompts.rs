//! Prompt builders.

use serde_json::{Map, Value, json};

use orgbrief_shared::{FieldMap, FieldSpec, PartitionKind, StageGroup};

use crate::{EntityProfile, Extractor, FieldScope};

const NO_FENCES: &str = "**Do not, under any circumstances, wrap the JSON in markdown code fences.**";

/// Reconciliation rules, strongest evidence first.
const EVIDENCE_HIERARCHY: [&str; 4] = [
    "**Prioritize Direct, Specific Statements:** A direct quote (e.g., 'Our ARR is now $1.2M') or a confirmed event is the most reliable evidence.",
    "**Use Logical Progression:** A larger team or higher ARR is almost always more recent than a smaller number. A completed action is more recent than a planned one.",
    "**Seek Corroboration:** Give high confidence to data points confirmed by multiple sources.",
    "**Acknowledge Uncertainty:** If no definitive conclusion can be drawn, state the conflict or the most likely scenario explicitly.",
];

fn persona(group: StageGroup) -> (&'static str, &'static str) {
    match group {
        StageGroup::GeneralInfo => ("market analyst", "key qualitative information"),
        StageGroup::Metrics => ("financial analyst", "key performance metrics"),
        StageGroup::Funding => ("venture capital analyst", "all relevant fundraising information"),
    }
}

/// One instruction per field: the bracket tag the model writes, then the
/// canonical key the tag stands for.
fn instruction_line(spec: &FieldSpec) -> String {
    if spec.prompt.is_empty() {
        format!("[{}] {}", spec.tag, spec.key)
    } else {
        format!("[{}] {}: {}", spec.tag, spec.key, spec.prompt)
    }
}

fn skeleton_line(spec: &FieldSpec) -> String {
    let item = r#"{"description": "", "sources": []}"#;
    if spec.multi_valued {
        format!("  \"{}\": [{item}]", spec.key)
    } else {
        format!("  \"{}\": {item}", spec.key)
    }
}

impl Extractor {
    /// Grounded research prompt for one stage group.
    pub fn extraction_prompt(&self, entity: &EntityProfile, group: StageGroup) -> String {
        let (role, goal) = persona(group);
        let tags: Vec<String> = self
            .fields(FieldScope::Group(group))
            .map(instruction_line)
            .collect();

        format!(
            "You are a {role}. Perform in-depth research on {entity} and extract {goal}.\n\n\
             **Instructions:**\n\
             1. Use your search capabilities to find information for each category below.\n\
             2. Write each piece of information on its own line.\n\
             3. Start each line with the category's [BRACKET_TAG].\n\
             4. If you find several distinct items for one category, write one line per item.\n\
             5. If a thorough search finds nothing for a category, leave its tag out.\n\
             6. Do not fabricate information. Every statement must be grounded in a verifiable source.\n\n\
             ---\n\
             **Categories to Extract:**\n\n\
             {tags}\n",
            entity = entity.label(),
            tags = tags.join("\n"),
        )
    }

    /// Formatting prompt turning tagged text into the JSON skeleton of `scope`.
    pub fn formatting_prompt(&self, raw: &str, scope: FieldScope) -> String {
        let skeleton: Vec<String> = self.fields(scope).map(skeleton_line).collect();

        format!(
            "You are a data formatting expert. Convert the \"Extracted Text\" below into a single \
             valid JSON object that strictly follows the \"JSON Schema\".\n\
             {NO_FENCES}\n\
             Output only the JSON. For each line of the text, find its [TAG] and use its \
             information and source URLs to fill the matching field. Multi-item fields are arrays.\n\n\
             ---\n\
             **JSON Schema:**\n\
             {{\n{skeleton}\n}}\n\n\
             ---\n\
             **Extracted Text:**\n\
             {raw}\n",
            skeleton = skeleton.join(",\n"),
        )
    }

    /// Formatting prompt for reconciled output covering every grouped field.
    pub fn synthesis_formatting_prompt(&self, raw: &str) -> String {
        self.formatting_prompt(raw, FieldScope::AllGroups)
    }

    /// Assemble the briefing package sent to the reconciliation prompt.
    ///
    /// Placeholder values are omitted so the model only weighs real evidence.
    pub fn briefing_package(
        &self,
        identity: &FieldMap,
        sources: &[(PartitionKind, FieldMap)],
    ) -> Value {
        let mut package = Map::new();
        for spec in self.schema().identity_fields() {
            let value = identity
                .get(&spec.key)
                .map(|v| v.render())
                .unwrap_or_default();
            package.insert(spec.key.clone(), Value::String(value));
        }

        let mut by_source = Map::new();
        for (partition, fields) in sources {
            let evidence: Map<String, Value> = self
                .fields(FieldScope::AllGroups)
                .filter_map(|spec| {
                    let value = fields.get(&spec.key)?;
                    (!value.is_sentinel())
                        .then(|| (spec.label.clone(), Value::String(value.render())))
                })
                .collect();
            by_source.insert(partition.as_str().to_string(), Value::Object(evidence));
        }
        package.insert("sources".into(), Value::Object(by_source));

        Value::Object(package)
    }

    /// Reconciliation prompt over a briefing package.
    pub fn synthesis_prompt(&self, entity: &EntityProfile, briefing: &Value) -> String {
        let hierarchy: Vec<String> = EVIDENCE_HIERARCHY
            .iter()
            .enumerate()
            .map(|(i, rule)| format!("{}. {rule}", i + 1))
            .collect();
        let tags: Vec<String> = self
            .fields(FieldScope::AllGroups)
            .map(instruction_line)
            .collect();

        format!(
            "**Persona:** You are a senior venture capital analyst who synthesizes incomplete and \
             conflicting data from several sources into a clear investment view.\n\n\
             **Objective:** Analyze the Briefing Package for {entity}. Reconcile all factual data, \
             then write updated subjective analysis.\n\n\
             ---\n\
             **Part 1: Data Reconciliation Logic**\n\n\
             Reconcile the 'internal', 'crm' and 'discovered' sources with this hierarchy of evidence:\n\
             {hierarchy}\n\n\
             ---\n\
             **Part 2: Tasks**\n\n\
             Task A: For every field, determine the single most accurate and up-to-date value.\n\
             Task B: Rewrite the recent news, strategic focus and risks analysis against the \
             reconciled facts, adding relevant market risks from your own knowledge.\n\n\
             ---\n\
             **Part 3: Output Instructions**\n\n\
             Answer as one block of text. Start every line with one of the tags below and include \
             every tag. Do not add other tags or commentary.\n\n\
             {tags}\n\n\
             ---\n\
             **Briefing Package for {name}:**\n\n\
             {briefing}\n",
            entity = entity.label(),
            name = entity.name,
            hierarchy = hierarchy.join("\n"),
            tags = tags.join("\n"),
        )
    }

    /// Prompt sent alongside attached documents.
    pub fn document_prompt(&self, entity: &EntityProfile) -> String {
        let keys: Vec<String> = self
            .fields(FieldScope::AllGroups)
            .map(|spec| format!("- {}: {}", spec.key, spec.label))
            .collect();

        format!(
            "You are an investment analyst reviewing the attached documents about {entity}.\n\
             Extract the following fields. Use only information stated in the documents, \
             quote figures with their period and currency, and leave a field as an empty \
             string when the documents do not mention it.\n\n\
             {keys}\n",
            entity = entity.label(),
            keys = keys.join("\n"),
        )
    }

    /// Response contract for document extraction: a string for every grouped field.
    pub fn document_response_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields(FieldScope::AllGroups)
            .map(|spec| (spec.key.clone(), json!({ "type": "STRING" })))
            .collect();
        json!({ "type": "OBJECT", "properties": properties })
    }
}
