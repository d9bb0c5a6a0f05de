use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use super::DashboardError;

/// One line of widget tabular output.
pub type Row = Vec<String>;

#[derive(Deserialize, Debug)]
struct WidgetRoot {
    #[serde(rename = "Data", default)]
    data: Option<Vec<Value>>,
}

/// Key of the widget's root object inside the view payload. The page element
/// carries an `id_` prefix the payload omits.
pub fn payload_key(widget_id: &str) -> &str {
    widget_id.strip_prefix("id_").unwrap_or(widget_id)
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Extracts the data rows from a `DashboardView` response.
///
/// The first element of `Data` is the table; its first two entries are
/// headers. An empty `Data` array or a header-only table is `NoResults`.
pub fn parse_widget_payload(body: &str, widget_id: &str) -> Result<Vec<Row>, DashboardError> {
    let key = payload_key(widget_id);
    let mut document: HashMap<String, Value> = serde_json::from_str(body)?;
    let root = document
        .remove(key)
        .ok_or_else(|| DashboardError::MissingRoot {
            key: key.to_string(),
        })?;
    let root: WidgetRoot = serde_json::from_value(root)?;
    let data = root.data.ok_or_else(|| DashboardError::MissingData {
        key: key.to_string(),
    })?;

    let Some(table) = data.first() else {
        return Err(DashboardError::NoResults {
            widget_id: widget_id.to_string(),
        });
    };
    let table = table
        .as_array()
        .ok_or_else(|| DashboardError::Malformed(format!("table of {key} is not an array")))?;
    if table.len() <= 2 {
        return Err(DashboardError::NoResults {
            widget_id: widget_id.to_string(),
        });
    }

    table[2..]
        .iter()
        .map(|row| {
            row.as_array()
                .map(|cells| cells.iter().map(cell_to_string).collect())
                .ok_or_else(|| DashboardError::Malformed(format!("row of {key} is not an array")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_key_strips_only_a_leading_prefix() {
        assert_eq!(payload_key("id_rate"), "rate");
        assert_eq!(payload_key("rate"), "rate");
        assert_eq!(payload_key("grid_id_1"), "grid_id_1");
    }

    #[test]
    fn rows_skip_headers_and_coerce_cells() {
        let body = r#"{"rate": {"Data": [[
            ["Period", "x", "Count", "Label"],
            ["string", "string", "int", "string"],
            ["10:00", "x", 10, "Approved"],
            ["10:00", null, 2.5, true]
        ]]}}"#;
        let rows = parse_widget_payload(body, "id_rate").unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["10:00", "x", "10", "Approved"],
                vec!["10:00", "", "2.5", "true"],
            ]
        );
    }

    #[test]
    fn unprefixed_widget_id_finds_the_same_root() {
        let body = r#"{"codes": {"Data": [[["h"], ["h"], ["a", "b"]]]}}"#;
        assert_eq!(parse_widget_payload(body, "codes").unwrap().len(), 1);
    }

    #[test]
    fn empty_data_and_header_only_tables_have_no_results() {
        let empty = r#"{"rate": {"Data": []}}"#;
        let header_only = r#"{"rate": {"Data": [[["h"], ["h"]]]}}"#;
        assert!(parse_widget_payload(empty, "id_rate").unwrap_err().is_no_results());
        assert!(parse_widget_payload(header_only, "id_rate").unwrap_err().is_no_results());
    }

    #[test]
    fn missing_root_or_data_is_not_a_no_results_error() {
        let wrong_root = r#"{"other": {"Data": []}}"#;
        let no_data = r#"{"rate": {"Rows": []}}"#;
        assert!(matches!(
            parse_widget_payload(wrong_root, "id_rate"),
            Err(DashboardError::MissingRoot { .. })
        ));
        assert!(matches!(
            parse_widget_payload(no_data, "id_rate"),
            Err(DashboardError::MissingData { .. })
        ));
    }
}
