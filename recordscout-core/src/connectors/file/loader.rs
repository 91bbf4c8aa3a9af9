//! Parsing of tabular files into an in-memory table.
//!
//! # Formats
//! - CSV: header row required; each column gets one inferred type
//! - JSON: an array of objects, a single object, or bare scalars; nested
//!   objects become dotted column names and arrays are kept as JSON text
//! - XML: children of every `record` element (else `item`, else `row`)
//!   become columns; without such elements the document is read as one
//!   flat record of every element that has text

use super::super::FileFormat;
use crate::Result;
use crate::error::RecordScoutError;
use crate::models::{Row, TableResult};
use quick_xml::events::Event;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Column name used for scalar values that have no key of their own.
pub const VALUE_COLUMN: &str = "value";

/// Parses file contents in the given format.
///
/// # Errors
/// Returns a connection error if the contents are not valid for the format
pub fn parse(bytes: &[u8], format: FileFormat) -> Result<TableResult> {
    match format {
        FileFormat::Csv => parse_csv(bytes),
        FileFormat::Json => parse_json(bytes),
        FileFormat::Xml => parse_xml(bytes),
    }
}

/// Describes the values observed in one column.
pub fn observed_type(rows: &[Row], column: &str) -> &'static str {
    let mut kinds = rows
        .iter()
        .filter_map(|row| row.get(column))
        .filter(|value| !value.is_null())
        .map(|value| match value {
            JsonValue::Bool(_) => "boolean",
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => "integer",
            JsonValue::Number(_) => "float",
            _ => "string",
        });

    let Some(first) = kinds.next() else {
        return "string";
    };
    let mut kind = first;
    for next in kinds {
        kind = match (kind, next) {
            (a, b) if a == b => a,
            ("integer", "float") | ("float", "integer") => "float",
            _ => return "mixed",
        };
    }
    kind
}

fn parse_csv(bytes: &[u8]) -> Result<TableResult> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| RecordScoutError::connection_failed("Failed to read CSV header", e))?
        .clone();
    let columns = unique_headers(headers.iter());

    let mut cells: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| RecordScoutError::connection_failed("Failed to read CSV record", e))?;
        cells.push(
            (0..columns.len())
                .map(|i| record.get(i).unwrap_or("").to_string())
                .collect(),
        );
    }

    let converters: Vec<CellType> = (0..columns.len())
        .map(|i| CellType::infer(cells.iter().map(|row| row[i].as_str())))
        .collect();

    let rows = cells
        .into_iter()
        .map(|record| {
            columns
                .iter()
                .zip(record)
                .zip(&converters)
                .map(|((column, cell), kind)| (column.clone(), kind.convert(cell)))
                .collect::<Row>()
        })
        .collect();

    Ok(TableResult::new(columns, rows))
}

/// Deduplicates header names the way spreadsheet tools do: `name`,
/// `name.1`, `name.2`. Blank headers become `column_<n>`.
fn unique_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut columns = Vec::new();
    for (index, header) in headers.enumerate() {
        let base = match header.trim() {
            "" => format!("column_{}", index + 1),
            name => name.to_string(),
        };
        let count = seen.entry(base.clone()).or_insert(0);
        let name = if *count == 0 {
            base
        } else {
            format!("{}.{}", base, count)
        };
        *count += 1;
        columns.push(name);
    }
    columns
}

/// Type shared by every non-empty cell of a CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellType {
    Integer,
    Float,
    Boolean,
    Text,
}

impl CellType {
    fn infer<'a>(cells: impl Iterator<Item = &'a str>) -> Self {
        let mut candidates = [Self::Integer, Self::Float, Self::Boolean];
        let mut any = false;
        for cell in cells.filter(|c| !c.trim().is_empty()) {
            any = true;
            for candidate in &mut candidates {
                if *candidate != Self::Text && candidate.parse(cell).is_none() {
                    *candidate = Self::Text;
                }
            }
        }
        if !any {
            return Self::Text;
        }
        candidates
            .into_iter()
            .find(|c| *c != Self::Text)
            .unwrap_or(Self::Text)
    }

    fn parse(self, cell: &str) -> Option<JsonValue> {
        let cell = cell.trim();
        match self {
            Self::Integer | Self::Float if has_leading_zero(cell) => None,
            Self::Integer => cell.parse::<i64>().ok().map(JsonValue::from),
            Self::Float => cell
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number),
            Self::Boolean => match cell.to_lowercase().as_str() {
                "true" => Some(JsonValue::Bool(true)),
                "false" => Some(JsonValue::Bool(false)),
                _ => None,
            },
            Self::Text => Some(JsonValue::String(cell.to_string())),
        }
    }

    fn convert(self, cell: String) -> JsonValue {
        if cell.trim().is_empty() {
            return JsonValue::Null;
        }
        match self {
            Self::Text => JsonValue::String(cell),
            other => other.parse(&cell).unwrap_or(JsonValue::String(cell)),
        }
    }
}

/// Leading zeros mark codes such as zip numbers, not quantities.
fn has_leading_zero(cell: &str) -> bool {
    let digits = cell.trim_start_matches(['-', '+']);
    let mut chars = digits.chars();
    chars.next() == Some('0') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

fn parse_json(bytes: &[u8]) -> Result<TableResult> {
    let document: JsonValue = serde_json::from_slice(bytes)
        .map_err(|e| RecordScoutError::connection_failed("Failed to parse JSON document", e))?;

    let rows = match document {
        JsonValue::Array(items) => items.into_iter().map(json_record).collect(),
        other => vec![json_record(other)],
    };
    Ok(TableResult::from_rows(rows))
}

fn json_record(value: JsonValue) -> Row {
    let mut row = Row::new();
    match value {
        JsonValue::Object(map) => flatten_into(&mut row, None, map),
        scalar => {
            row.insert(VALUE_COLUMN.to_string(), flat_scalar(scalar));
        }
    }
    row
}

fn flatten_into(row: &mut Row, prefix: Option<&str>, map: serde_json::Map<String, JsonValue>) {
    for (key, value) in map {
        let column = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key,
        };
        match value {
            JsonValue::Object(nested) => flatten_into(row, Some(column.as_str()), nested),
            other => {
                row.insert(column, flat_scalar(other));
            }
        }
    }
}

fn flat_scalar(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Array(_) | JsonValue::Object(_) => JsonValue::String(value.to_string()),
        scalar => scalar,
    }
}

/// Minimal element tree; attributes are kept, mixed content is not.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn descendants<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.descendants(name, out);
        }
    }

    fn all<'a>(&'a self, out: &mut Vec<&'a Element>) {
        out.push(self);
        for child in &self.children {
            child.all(out);
        }
    }
}

const RECORD_ELEMENTS: [&str; 3] = ["record", "item", "row"];

fn parse_xml(bytes: &[u8]) -> Result<TableResult> {
    let root = read_xml_tree(bytes)?;

    let records = RECORD_ELEMENTS
        .iter()
        .map(|name| {
            let mut found = Vec::new();
            root.descendants(name, &mut found);
            found
        })
        .find(|found| !found.is_empty());

    let rows = match records {
        Some(records) => records.into_iter().map(xml_record).collect(),
        None => {
            let mut elements = Vec::new();
            root.all(&mut elements);
            let mut row = Row::new();
            for element in elements {
                let text = element.text.trim();
                if !text.is_empty() {
                    row.insert(element.name.clone(), JsonValue::String(text.to_string()));
                }
            }
            vec![row]
        }
    };
    Ok(TableResult::from_rows(rows))
}

fn xml_record(record: &Element) -> Row {
    let mut row = Row::new();
    for (name, value) in &record.attributes {
        row.insert(name.clone(), JsonValue::String(value.clone()));
    }
    for child in &record.children {
        let text = child.text.trim();
        let value = if text.is_empty() {
            JsonValue::Null
        } else {
            JsonValue::String(text.to_string())
        };
        row.insert(child.name.clone(), value);
    }
    row
}

fn read_xml_tree(bytes: &[u8]) -> Result<Element> {
    let mut reader = quick_xml::Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(open_element(&e)?),
            Ok(Event::Empty(e)) => {
                let element = open_element(&e)?;
                close_element(&mut stack, &mut root, element);
            }
            Ok(Event::Text(te)) => {
                let text = te.unescape().map_err(|e| {
                    RecordScoutError::connection_failed("Failed to parse XML text", e)
                })?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(cdata)) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&cdata.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if let Some(element) = stack.pop() {
                    close_element(&mut stack, &mut root, element);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RecordScoutError::connection_failed(
                    "Failed to parse XML document",
                    e,
                ));
            }
            _ => {}
        }
        buf.clear();
    }

    root.ok_or_else(|| {
        RecordScoutError::connection_refused("XML document has no root element")
    })
}

fn open_element(e: &quick_xml::events::BytesStart<'_>) -> Result<Element> {
    let mut attributes = Vec::new();
    for attribute in e.attributes() {
        let attribute = attribute.map_err(|e| {
            RecordScoutError::connection_failed("Failed to parse XML attribute", e)
        })?;
        let value = attribute.unescape_value().map_err(|e| {
            RecordScoutError::connection_failed("Failed to parse XML attribute", e)
        })?;
        attributes.push((
            String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned(),
            value.into_owned(),
        ));
    }
    Ok(Element {
        name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
        attributes,
        ..Default::default()
    })
}

fn close_element(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}
