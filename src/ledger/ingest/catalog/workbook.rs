use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use calamine::{DataType, Range, Reader, Sheets, open_workbook_auto};
use tracing::debug;

use crate::ledger::ingest::analysis::compare::Aggregation;
use crate::ledger::ingest::catalog::{
    CatalogDocument, CategoryDocument, ComparisonRule, FieldTypes, NumericFields,
};
use crate::ledger::ingest::error::{IngestError, Result};
use crate::ledger::ingest::postprocess::TransformSpec;

pub const FILE_HEADERS_SHEET: &str = "FileHeaders";
pub const CANONICAL_HEADERS_SHEET: &str = "FindapHeaders";
pub const GROUPS_SHEET: &str = "Categories_sheetnames";
pub const FORMATS_SHEET: &str = "Dataformat";
pub const DATE_FORMATS_SHEET: &str = "Dates formats";
pub const DUPLICATES_SHEET: &str = "Check_duplicates";
pub const NUMERIC_FIELDS_SHEET: &str = "NUMERIC_FIELDS_CONFIG";
pub const COMPARISON_SHEET: &str = "COMPARISON";
pub const TRANSFORMS_SHEET: &str = "TRANSFORMS";

type Workbook = Sheets<std::io::BufReader<std::fs::File>>;

/// Reads the analyst-maintained parameter workbook into a [`CatalogDocument`].
///
/// Category order follows the columns of the `FileHeaders` sheet; schemas that
/// only appear in `FindapHeaders` (detail layouts produced by splitting) are
/// appended after them.
pub fn read_parameter_workbook(path: &Path) -> Result<CatalogDocument> {
    let mut workbook = open_workbook_auto(path)?;

    let source = columns_by_header(&read_required_sheet(&mut workbook, FILE_HEADERS_SHEET)?);
    let canonical = columns_by_header(&read_required_sheet(&mut workbook, CANONICAL_HEADERS_SHEET)?);
    let groups = table_rows(&read_required_sheet(&mut workbook, GROUPS_SHEET)?);
    let formats = table_rows(&read_required_sheet(&mut workbook, FORMATS_SHEET)?);
    let date_formats = table_rows(&read_required_sheet(&mut workbook, DATE_FORMATS_SHEET)?);
    let duplicates = columns_by_header(&read_required_sheet(&mut workbook, DUPLICATES_SHEET)?);

    let mut ids: Vec<String> = source.iter().map(|(id, _)| id.clone()).collect();
    for (id, _) in &canonical {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }

    let group_rows: HashMap<String, &HashMap<String, String>> = groups
        .iter()
        .filter_map(|row| row.get("CATEGORY").map(|id| (id.clone(), row)))
        .collect();
    let lookup = |columns: &[(String, Vec<String>)], id: &str| {
        columns
            .iter()
            .find(|(name, _)| name == id)
            .map(|(_, values)| values.clone())
            .unwrap_or_default()
    };

    let mut transforms = match read_optional_sheet(&mut workbook, TRANSFORMS_SHEET)? {
        Some(range) => parse_transforms(&range)?,
        None => HashMap::new(),
    };

    let categories = ids
        .iter()
        .map(|id| {
            let row = group_rows.get(id);
            let field = |name: &str| row.and_then(|row| row.get(name)).cloned();
            CategoryDocument {
                id: id.clone(),
                source_headers: lookup(&source, id),
                canonical_headers: lookup(&canonical, id),
                data_group: field("DATA GROUP"),
                category_group: field("CATEGORY GROUP"),
                statement_group: field("FINANCIAL STATEMENT GROUP"),
                duplicate_keys: lookup(&duplicates, id),
                transforms: transforms.remove(id).unwrap_or_default(),
            }
        })
        .collect();

    if let Some(id) = transforms.keys().next() {
        return Err(IngestError::catalog(format!(
            "{TRANSFORMS_SHEET} references unknown category '{id}'"
        )));
    }

    let field_types = FieldTypes {
        float: column_values(&formats, "FORMAT FLOAT"),
        date: column_values(&formats, "FORMAT DATE"),
    };

    let numeric_fields = match read_optional_sheet(&mut workbook, NUMERIC_FIELDS_SHEET)? {
        Some(range) => Some(parse_numeric_fields(&range)?),
        None => None,
    };
    let comparison_rules = match read_optional_sheet(&mut workbook, COMPARISON_SHEET)? {
        Some(range) => parse_comparison_rules(&range)?,
        None => Vec::new(),
    };

    debug!(categories = ids.len(), "parameter workbook parsed");
    Ok(CatalogDocument {
        categories,
        field_types,
        date_formats: column_values(&date_formats, "DATES FORMATS"),
        numeric_fields,
        comparison_rules,
    })
}

fn read_required_sheet(workbook: &mut Workbook, name: &str) -> Result<Range<DataType>> {
    read_optional_sheet(workbook, name)?
        .ok_or_else(|| IngestError::catalog(format!("missing sheet '{name}'")))
}

fn read_optional_sheet(workbook: &mut Workbook, name: &str) -> Result<Option<Range<DataType>>> {
    match workbook.worksheet_range(name) {
        Some(range) => Ok(Some(range?)),
        None => Ok(None),
    }
}

/// Column-major layout: header cell is the key, non-empty cells below are the
/// values.
fn columns_by_header(range: &Range<DataType>) -> Vec<(String, Vec<String>)> {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let mut columns: Vec<(String, Vec<String>)> = header
        .iter()
        .map(|cell| (cell_to_string(Some(cell)).trim().to_string(), Vec::new()))
        .collect();
    for row in rows {
        for (idx, (_, values)) in columns.iter_mut().enumerate() {
            let value = cell_to_string(row.get(idx)).trim().to_string();
            if !value.is_empty() {
                values.push(value);
            }
        }
    }
    columns.retain(|(name, _)| !name.is_empty());
    columns
}

/// Row-major layout keyed by upper-cased header.
fn table_rows(range: &Range<DataType>) -> Vec<HashMap<String, String>> {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let names: Vec<String> = header
        .iter()
        .map(|cell| cell_to_string(Some(cell)).trim().to_uppercase())
        .collect();
    rows.map(|row| {
        names
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(idx, name)| (name.clone(), cell_to_string(row.get(idx)).trim().to_string()))
            .filter(|(_, value)| !value.is_empty())
            .collect::<HashMap<_, _>>()
    })
    .filter(|row| !row.is_empty())
    .collect()
}

fn column_values(rows: &[HashMap<String, String>], name: &str) -> Vec<String> {
    rows.iter().filter_map(|row| row.get(name).cloned()).collect()
}

fn parse_numeric_fields(range: &Range<DataType>) -> Result<NumericFields> {
    let mut fields = NumericFields {
        include: Vec::new(),
        exclude: Vec::new(),
    };
    for row in table_rows(range) {
        let Some(pattern) = row.get("FIELD_PATTERN") else {
            continue;
        };
        match row.get("ACTION").map(|action| action.to_uppercase()).as_deref() {
            Some("INCLUDE") => fields.include.push(pattern.clone()),
            Some("EXCLUDE") => fields.exclude.push(pattern.clone()),
            other => {
                return Err(IngestError::catalog(format!(
                    "{NUMERIC_FIELDS_SHEET}: unknown action {other:?} for '{pattern}'"
                )));
            }
        }
    }
    Ok(fields)
}

/// Rows sharing (category 1, category 2, priority) are folded into one rule.
fn parse_comparison_rules(range: &Range<DataType>) -> Result<Vec<ComparisonRule>> {
    let mut rules: BTreeMap<(u32, String, String), ComparisonRule> = BTreeMap::new();
    for row in table_rows(range) {
        let (Some(category_a), Some(category_b)) = (row.get("CATEGORY 1"), row.get("CATEGORY 2"))
        else {
            continue;
        };
        let priority = match row.get("PRIORITY") {
            Some(raw) => raw.parse::<f64>().map(|p| p as u32).map_err(|_| {
                IngestError::catalog(format!("{COMPARISON_SHEET}: invalid priority '{raw}'"))
            })?,
            None => 0,
        };
        let enabled = row.get("ENABLED").is_none_or(|raw| is_truthy(raw));
        let rule = rules
            .entry((priority, category_a.clone(), category_b.clone()))
            .or_insert_with(|| ComparisonRule {
                category_a: category_a.clone(),
                category_b: category_b.clone(),
                priority,
                enabled,
                fields: Vec::new(),
                aggregations: Vec::new(),
            });
        rule.enabled &= enabled;
        if let (Some(a), Some(b)) = (row.get("FIELD 1"), row.get("FIELD 2")) {
            rule.fields.push((a.clone(), b.clone()));
        }
        if let Some(raw) = row.get("AGGREGATION") {
            for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let aggregation = Aggregation::parse(name).ok_or_else(|| {
                    IngestError::catalog(format!(
                        "{COMPARISON_SHEET}: unknown aggregation '{name}'"
                    ))
                })?;
                if !rule.aggregations.contains(&aggregation) {
                    rule.aggregations.push(aggregation);
                }
            }
        }
    }
    Ok(rules.into_values().collect())
}

fn parse_transforms(range: &Range<DataType>) -> Result<HashMap<String, Vec<TransformSpec>>> {
    let mut transforms: HashMap<String, Vec<TransformSpec>> = HashMap::new();
    for row in table_rows(range) {
        let (Some(category), Some(rule)) = (row.get("CATEGORY"), row.get("RULE")) else {
            continue;
        };
        let spec = serde_json::from_str::<TransformSpec>(rule).map_err(|error| {
            IngestError::catalog(format!(
                "{TRANSFORMS_SHEET}: invalid rule for '{category}': {error}"
            ))
        })?;
        transforms.entry(category.clone()).or_default().push(spec);
    }
    Ok(transforms)
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_uppercase().as_str(), "TRUE" | "YES" | "Y" | "1")
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.clone(),
        Some(DataType::Float(value)) => value.to_string(),
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
