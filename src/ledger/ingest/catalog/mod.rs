//! The immutable registry of known sheet layouts.
//!
//! A [`Catalog`] is loaded once, validated up front, and then shared read-only
//! (behind an `Arc`) by every worker. Two sources are accepted: a JSON document
//! and the tabular parameter workbook maintained by analysts.

pub mod workbook;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::ledger::ingest::analysis::compare::Aggregation;
use crate::ledger::ingest::error::{IngestError, Result};
use crate::ledger::ingest::model::{ColumnType, UNKNOWN_CATEGORY, normalize_token};
use crate::ledger::ingest::normalize::dates::DateResolver;
use crate::ledger::ingest::postprocess::{
    Stage, TransformRule, TransformSpec, check_entry_schema,
};

/// Date patterns tried when the catalog declares none.
pub const DEFAULT_DATE_FORMATS: [&str; 10] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %m %Y",
    "%Y/%m/%d",
    "%Y%m%d",
];

const DEFAULT_NUMERIC_INCLUDE: [&str; 7] = ["AMOUNT", "VAT", "TOTAL", "TAXABLE", "TAX", "GROSS", "NET"];
const DEFAULT_NUMERIC_EXCLUDE: [&str; 8] = [
    "ID",
    "LINE NUMBER",
    "INVOICE NUMBER",
    "RECEIPT NUMBER",
    "YEAR",
    "MONTH",
    "DAY",
    "LINE_NUMBER",
];

/// Serialized form of a catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub categories: Vec<CategoryDocument>,
    #[serde(default)]
    pub field_types: FieldTypes,
    #[serde(default)]
    pub date_formats: Vec<String>,
    #[serde(default)]
    pub numeric_fields: Option<NumericFields>,
    #[serde(default)]
    pub comparison_rules: Vec<ComparisonRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryDocument {
    pub id: String,
    #[serde(default)]
    pub source_headers: Vec<String>,
    #[serde(default)]
    pub canonical_headers: Vec<String>,
    #[serde(default)]
    pub data_group: Option<String>,
    #[serde(default)]
    pub category_group: Option<String>,
    #[serde(default)]
    pub statement_group: Option<String>,
    #[serde(default)]
    pub duplicate_keys: Vec<String>,
    #[serde(default)]
    pub transforms: Vec<TransformSpec>,
}

/// Global lists of canonical field names by declared type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldTypes {
    #[serde(default)]
    pub float: Vec<String>,
    #[serde(default)]
    pub date: Vec<String>,
}

/// Substring patterns deciding which float fields are summed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericFields {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for NumericFields {
    fn default() -> Self {
        Self {
            include: DEFAULT_NUMERIC_INCLUDE.iter().map(|s| s.to_string()).collect(),
            exclude: DEFAULT_NUMERIC_EXCLUDE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl NumericFields {
    /// Case-insensitive substring test: some include pattern matches (or the
    /// include list is empty) and no exclude pattern does.
    pub fn admits(&self, field: &str) -> bool {
        let field = field.to_uppercase();
        let included = self.include.is_empty()
            || self
                .include
                .iter()
                .any(|pattern| field.contains(&pattern.to_uppercase()));
        included
            && !self
                .exclude
                .iter()
                .any(|pattern| field.contains(&pattern.to_uppercase()))
    }
}

/// A configured pairing of two categories for comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRule {
    pub category_a: String,
    pub category_b: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub fields: Vec<(String, String)>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
}

fn enabled_by_default() -> bool {
    true
}

/// One known sheet layout.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub id: String,
    pub source_headers: Vec<String>,
    pub canonical_headers: Vec<String>,
    pub field_types: BTreeMap<String, ColumnType>,
    pub duplicate_keys: Vec<String>,
    pub data_group: Option<String>,
    pub category_group: Option<String>,
    pub statement_group: Option<String>,
    pub transforms: Vec<TransformRule>,
    header_tokens: HashSet<String>,
}

impl CatalogEntry {
    /// Upper-cased, trimmed, non-empty source header tokens.
    pub fn header_tokens(&self) -> &HashSet<String> {
        &self.header_tokens
    }

    /// Headers the mapped record set carries: canonical when declared,
    /// otherwise the source headers themselves.
    pub fn output_headers(&self) -> &[String] {
        if self.canonical_headers.is_empty() {
            &self.source_headers
        } else {
            &self.canonical_headers
        }
    }

    pub fn field_type(&self, name: &str) -> ColumnType {
        self.field_types
            .get(name)
            .copied()
            .unwrap_or(ColumnType::Text)
    }

    pub fn transforms_for(&self, stage: Stage) -> impl Iterator<Item = &TransformRule> {
        self.transforms.iter().filter(move |rule| rule.stage() == stage)
    }
}

/// Immutable, validated catalog of category schemas and engine parameters.
#[derive(Debug)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
    field_types: HashMap<String, ColumnType>,
    date_formats: Vec<String>,
    numeric_fields: NumericFields,
    comparison_rules: Vec<ComparisonRule>,
    dates: DateResolver,
}

impl Catalog {
    /// Loads a catalog from a `.json` document or a parameter workbook.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IngestError::catalog(format!(
                "catalog source '{}' does not exist",
                path.display()
            )));
        }
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let document = match extension.as_str() {
            "json" => {
                let data = std::fs::read_to_string(path)?;
                serde_json::from_str::<CatalogDocument>(&data)
                    .map_err(|error| IngestError::catalog(format!("invalid catalog JSON: {error}")))?
            }
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => workbook::read_parameter_workbook(path)?,
            _ => {
                return Err(IngestError::catalog(format!(
                    "unsupported catalog source '{}'",
                    path.display()
                )));
            }
        };
        let catalog = Self::from_document(document)?;
        info!(categories = catalog.entries.len(), "catalog loaded");
        Ok(catalog)
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let document = serde_json::from_str::<CatalogDocument>(data)
            .map_err(|error| IngestError::catalog(format!("invalid catalog JSON: {error}")))?;
        Self::from_document(document)
    }

    /// Validates and compiles a document. Any inconsistency is a
    /// [`IngestError::CatalogLoad`].
    pub fn from_document(document: CatalogDocument) -> Result<Self> {
        if document.categories.is_empty() {
            return Err(IngestError::catalog("catalog declares no categories"));
        }

        let mut field_types = HashMap::new();
        for name in &document.field_types.float {
            field_types.insert(name.trim().to_string(), ColumnType::Float);
        }
        for name in &document.field_types.date {
            if field_types.contains_key(name.trim()) {
                return Err(IngestError::catalog(format!(
                    "field '{name}' is declared both FLOAT and DATE"
                )));
            }
            field_types.insert(name.trim().to_string(), ColumnType::Date);
        }

        let mut entries = Vec::with_capacity(document.categories.len());
        let mut index = HashMap::new();
        for category in document.categories {
            let id = category.id.trim().to_string();
            if id.is_empty() {
                return Err(IngestError::catalog("category with an empty id"));
            }
            if id == UNKNOWN_CATEGORY {
                return Err(IngestError::catalog(format!(
                    "'{UNKNOWN_CATEGORY}' is reserved and cannot be a category id"
                )));
            }
            if index.contains_key(&id) {
                return Err(IngestError::catalog(format!("duplicate category id '{id}'")));
            }
            let entry = compile_entry(id.clone(), category, &field_types)?;
            index.insert(id, entries.len());
            entries.push(entry);
        }

        for entry in &entries {
            for rule in &entry.transforms {
                for target in rule.referenced_categories() {
                    if !index.contains_key(target) {
                        return Err(IngestError::catalog(format!(
                            "transform '{}' of '{}' references unknown category '{target}'",
                            rule.name(),
                            entry.id
                        )));
                    }
                }
            }
        }

        for rule in &document.comparison_rules {
            for category in [&rule.category_a, &rule.category_b] {
                if !index.contains_key(category.as_str()) {
                    return Err(IngestError::catalog(format!(
                        "comparison rule references unknown category '{category}'"
                    )));
                }
            }
        }
        let mut comparison_rules = document.comparison_rules;
        comparison_rules.sort_by_key(|rule| rule.priority);

        let date_formats = if document.date_formats.is_empty() {
            DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect()
        } else {
            document.date_formats
        };
        debug!(formats = date_formats.len(), "date formats configured");

        Ok(Self {
            dates: DateResolver::new(date_formats.clone()),
            entries,
            index,
            field_types,
            date_formats,
            numeric_fields: document.numeric_fields.unwrap_or_default(),
            comparison_rules,
        })
    }

    pub fn entry(&self, category: &str) -> Option<&CatalogEntry> {
        self.index.get(category).map(|&idx| &self.entries[idx])
    }

    /// Entries in load order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Declared type of a canonical field; undeclared fields are text.
    pub fn field_type(&self, name: &str) -> ColumnType {
        self.field_types
            .get(name)
            .copied()
            .unwrap_or(ColumnType::Text)
    }

    pub fn date_formats(&self) -> &[String] {
        &self.date_formats
    }

    pub fn date_resolver(&self) -> &DateResolver {
        &self.dates
    }

    pub fn numeric_fields(&self) -> &NumericFields {
        &self.numeric_fields
    }

    /// Enabled rules, lowest priority number first.
    pub fn comparison_rules(&self) -> impl Iterator<Item = &ComparisonRule> {
        self.comparison_rules.iter().filter(|rule| rule.enabled)
    }

    pub fn categories_in_group<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a CatalogEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.statement_group.as_deref() == Some(group))
    }

    pub fn statement_groups(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .filter_map(|entry| entry.statement_group.as_deref())
            .collect()
    }
}

fn compile_entry(
    id: String,
    category: CategoryDocument,
    field_types: &HashMap<String, ColumnType>,
) -> Result<CatalogEntry> {
    let source_headers = trimmed(category.source_headers);
    let canonical_headers = trimmed(category.canonical_headers);

    let mut seen = HashSet::new();
    for header in &canonical_headers {
        if !seen.insert(header.as_str()) {
            return Err(IngestError::catalog(format!(
                "category '{id}' repeats canonical header '{header}'"
            )));
        }
    }

    let header_tokens = source_headers
        .iter()
        .map(|header| normalize_token(header))
        .filter(|token| !token.is_empty())
        .collect();

    let output = if canonical_headers.is_empty() {
        &source_headers
    } else {
        &canonical_headers
    };
    let entry_types = output
        .iter()
        .map(|name| {
            let kind = field_types.get(name).copied().unwrap_or(ColumnType::Text);
            (name.clone(), kind)
        })
        .collect();

    let transforms = category
        .transforms
        .iter()
        .map(TransformRule::compile)
        .collect::<Result<Vec<_>>>()
        .and_then(|rules| {
            check_entry_schema(output, &rules, field_types)?;
            Ok(rules)
        })
        .map_err(|error| match error {
            IngestError::CatalogLoad(message) => {
                IngestError::catalog(format!("category '{id}': {message}"))
            }
            other => IngestError::catalog(format!("category '{id}': {other}")),
        })?;

    Ok(CatalogEntry {
        id,
        source_headers,
        canonical_headers,
        field_types: entry_types,
        duplicate_keys: trimmed(category.duplicate_keys),
        data_group: non_empty(category.data_group),
        category_group: non_empty(category.category_group),
        statement_group: non_empty(category.statement_group),
        transforms,
        header_tokens,
    })
}

fn trimmed(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
