//! Translation DSL engine.
//!
//! Deterministically maps a flat attribute bag, as produced by any
//! supported third-party instrumentor, onto the canonical four-section
//! event schema. Provider-specific behavior lives entirely in the data
//! loaded from `bundle.yaml` -- there is no `if provider == "x"` branch
//! anywhere in this module. Adding a provider means adding rules, not
//! code.

use honeytrace_core::{Section, TranslationError, TranslationResult};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

const BUNDLE_YAML: &str = include_str!("bundle.yaml");
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Deserialize)]
struct ProviderSignature {
    confidence_weight: f64,
    signature_fields: Vec<String>,
    #[serde(default)]
    model_patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ExtractionMethod {
    DirectCopy,
    ArrayReconstruction,
    StringExtraction,
    NumericCalculation,
}

#[derive(Debug, Clone, Deserialize)]
struct NavigationRule {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    paths: Vec<String>,
    method: ExtractionMethod,
    #[serde(default)]
    role_path: Option<String>,
    #[serde(default)]
    role_filter: Option<String>,
    #[serde(default)]
    join_separator: Option<String>,
    #[serde(default)]
    preserve_json_strings: Vec<String>,
    #[serde(default)]
    numeric_op: Option<String>,
    #[serde(default)]
    fallback_value: Option<Value>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum SectionName {
    Inputs,
    Outputs,
    Config,
    Metadata,
}

#[derive(Debug, Clone, Deserialize)]
struct FieldMapping {
    section: SectionName,
    canonical_key: String,
    rule: String,
    #[serde(default)]
    required: bool,
}

#[derive(Debug, Deserialize)]
struct RawBundle {
    #[allow(dead_code)]
    version: u32,
    providers: HashMap<String, ProviderSignature>,
    navigation_rules: HashMap<String, HashMap<String, NavigationRule>>,
    field_mappings: HashMap<String, Vec<FieldMapping>>,
}

/// The compiled, immutable translation bundle. Parsed once from the
/// bundled YAML and shared read-only across every tracer instance.
pub struct DslBundle {
    raw: RawBundle,
}

static BUNDLE: OnceCell<DslBundle> = OnceCell::new();

impl DslBundle {
    /// The process-wide shared bundle. Parsing the embedded YAML is
    /// infallible for the bundle this crate ships, so this never fails;
    /// a malformed bundle would be a packaging bug caught by the test
    /// suite, not a runtime condition.
    pub fn shared() -> &'static DslBundle {
        BUNDLE.get_or_init(|| {
            let raw: RawBundle =
                serde_yaml::from_str(BUNDLE_YAML).expect("bundled dsl/bundle.yaml must parse");
            DslBundle { raw }
        })
    }

    pub fn version(&self) -> u32 {
        self.raw.version
    }

    /// Detection algorithm: O(1) per provider. Computes, for every
    /// provider in the bundle, the intersection of its signature fields
    /// with the attribute key set, scores it, and returns the
    /// highest-scoring provider above the confidence threshold.
    /// Ties break on lexicographic provider name.
    pub fn detect_provider(&self, attrs: &HashMap<String, Value>) -> Option<String> {
        let mut best: Option<(String, f64)> = None;
        for (name, sig) in &self.raw.providers {
            let matched = sig
                .signature_fields
                .iter()
                .filter(|f| attrs.contains_key(f.as_str()))
                .count();
            if sig.signature_fields.is_empty() {
                continue;
            }
            let mut score = (matched as f64 / sig.signature_fields.len() as f64) * sig.confidence_weight;

            if !sig.model_patterns.is_empty() {
                let model_value = attrs
                    .values()
                    .filter_map(|v| v.as_str())
                    .find(|s| sig.model_patterns.iter().any(|p| s.contains(p.as_str())));
                score *= if model_value.is_some() { 1.0 } else { 0.0 };
            }

            if score < DEFAULT_CONFIDENCE_THRESHOLD {
                continue;
            }

            best = match best {
                Some((best_name, best_score))
                    if best_score > score || (best_score == score && best_name < *name) =>
                {
                    Some((best_name, best_score))
                }
                _ => Some((name.clone(), score)),
            };
        }
        best.map(|(name, _)| name)
    }

    /// Runs extraction + mapping for a detected provider, producing the
    /// four canonical sections.
    pub fn map_to_canonical(
        &self,
        provider: &str,
        attrs: &HashMap<String, Value>,
    ) -> TranslationResult<(Section, Section, Section, Section)> {
        let rules = self
            .raw
            .navigation_rules
            .get(provider)
            .ok_or(TranslationError::UnknownProvider)?;
        let mappings = self
            .raw
            .field_mappings
            .get(provider)
            .ok_or(TranslationError::UnknownProvider)?;

        let mut inputs = Section::new();
        let mut outputs = Section::new();
        let mut config = Section::new();
        let mut metadata = Section::new();

        for mapping in mappings {
            let rule = rules
                .get(&mapping.rule)
                .ok_or_else(|| TranslationError::TransformFailed(mapping.rule.clone()))?;

            let value = extract(rule, attrs)?;

            let value = match value {
                Some(v) => v,
                None => match &rule.fallback_value {
                    Some(v) => v.clone(),
                    None if mapping.required => {
                        return Err(TranslationError::MissingRequiredField(mapping.canonical_key.clone()))
                    }
                    None => continue,
                },
            };

            let section = match mapping.section {
                SectionName::Inputs => &mut inputs,
                SectionName::Outputs => &mut outputs,
                SectionName::Config => &mut config,
                SectionName::Metadata => &mut metadata,
            };
            // First non-null wins across multiple rules targeting the
            // same canonical key, per the bundle's declaration order.
            section.entry(mapping.canonical_key.clone()).or_insert(value);
        }

        Ok((inputs, outputs, config, metadata))
    }
}

fn extract(rule: &NavigationRule, attrs: &HashMap<String, Value>) -> TranslationResult<Option<Value>> {
    match rule.method {
        ExtractionMethod::DirectCopy => {
            let path = rule.path.as_deref().unwrap_or_default();
            Ok(attrs.get(path).cloned())
        }
        ExtractionMethod::ArrayReconstruction => {
            let prefix = rule
                .path
                .as_deref()
                .unwrap_or_default()
                .trim_end_matches(".*")
                .to_string();
            Ok(reconstruct_array(&prefix, attrs, &rule.preserve_json_strings))
        }
        ExtractionMethod::StringExtraction => {
            let content_pattern = rule.path.as_deref().unwrap_or_default();
            let role_pattern = rule.role_path.as_deref();
            let role_filter = rule.role_filter.as_deref();
            let separator = rule.join_separator.as_deref().unwrap_or("");
            Ok(string_extraction(content_pattern, role_pattern, role_filter, separator, attrs))
        }
        ExtractionMethod::NumericCalculation => {
            let op = rule.numeric_op.as_deref().unwrap_or("sum");
            Ok(numeric_calculation(&rule.paths, op, attrs))
        }
    }
}

/// Rebuilds an array from flattened keys of the form `prefix.0.foo`,
/// `prefix.1.foo`, preserving entries listed in `preserve_json_strings`
/// as raw JSON strings rather than re-parsing them.
fn reconstruct_array(
    prefix: &str,
    attrs: &HashMap<String, Value>,
    preserve_json_strings: &[String],
) -> Option<Value> {
    let mut indices: Vec<usize> = attrs
        .keys()
        .filter_map(|k| k.strip_prefix(&format!("{prefix}.")))
        .filter_map(|rest| rest.split('.').next())
        .filter_map(|idx| idx.parse::<usize>().ok())
        .collect();
    indices.sort_unstable();
    indices.dedup();

    if indices.is_empty() {
        return None;
    }

    let items: Vec<Value> = indices
        .into_iter()
        .map(|i| {
            let item_prefix = format!("{prefix}.{i}.");
            let mut obj = serde_json::Map::new();
            for (key, value) in attrs {
                if let Some(field) = key.strip_prefix(&item_prefix) {
                    let preserve = preserve_json_strings.iter().any(|f| f == field);
                    let value = match (preserve, value.as_str()) {
                        // Fields not flagged for preservation may hold a
                        // JSON-encoded string (e.g. tool call arguments);
                        // parse it back into structured data.
                        (false, Some(s)) => serde_json::from_str(s).unwrap_or_else(|_| value.clone()),
                        _ => value.clone(),
                    };
                    obj.insert(field.to_string(), value);
                }
            }
            Value::Object(obj)
        })
        .collect();

    Some(Value::Array(items))
}

/// Splits a single-wildcard pattern like `llm.output_messages.*.content`
/// into its literal prefix and suffix around the `*`. A pattern with no
/// wildcard is treated as an all-prefix, empty-suffix split.
fn split_wildcard(pattern: &str) -> (&str, &str) {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => (prefix, suffix),
        None => (pattern, ""),
    }
}

/// Filters a role-tagged flattened message list down to entries whose
/// role matches `role_filter`, then joins their content values.
fn string_extraction(
    content_pattern: &str,
    role_pattern: Option<&str>,
    role_filter: Option<&str>,
    separator: &str,
    attrs: &HashMap<String, Value>,
) -> Option<Value> {
    let (content_prefix, content_suffix) = split_wildcard(content_pattern);
    let role_split = role_pattern.map(split_wildcard);

    let mut indices: Vec<usize> = attrs
        .keys()
        .filter_map(|k| k.strip_prefix(content_prefix))
        .filter_map(|rest| rest.strip_suffix(content_suffix))
        .filter_map(|idx| idx.parse::<usize>().ok())
        .collect();
    indices.sort_unstable();

    let mut parts = Vec::new();
    for idx in indices {
        if let (Some((role_prefix, role_suffix)), Some(wanted)) = (&role_split, role_filter) {
            let role_key = format!("{role_prefix}{idx}{role_suffix}");
            match attrs.get(&role_key).and_then(|v| v.as_str()) {
                Some(role) if role == wanted => {}
                _ => continue,
            }
        }
        let content_key = format!("{content_prefix}{idx}{content_suffix}");
        if let Some(content) = attrs.get(&content_key).and_then(|v| v.as_str()) {
            parts.push(content.to_string());
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(Value::String(parts.join(separator)))
    }
}

fn numeric_calculation(paths: &[String], op: &str, attrs: &HashMap<String, Value>) -> Option<Value> {
    let values: Vec<f64> = paths
        .iter()
        .filter_map(|p| attrs.get(p))
        .filter_map(|v| v.as_f64())
        .collect();
    if values.is_empty() {
        return None;
    }
    let result = match op {
        "sum" => values.iter().sum(),
        "first" => values[0],
        _ => values.iter().sum(),
    };
    Some(serde_json::json!(result))
}
