use serde_json::Value;

use datasage_core::analytics::QueryRows;

/// `204593.889` -> `204,593.89`.
pub fn format_amount(value: f64) -> String {
    let rounded = format!("{:.2}", value.abs());
    let (whole, fraction) = rounded.split_once('.').unwrap_or((rounded.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if value < 0.0 && rounded != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{fraction}")
}

/// Text the model and the caller see for a query result.
pub fn render_rows(rows: &QueryRows) -> String {
    if rows.total_rows == 0 {
        return "Query executed successfully but returned no results.".to_string();
    }

    let mut output = if rows.count_capped {
        format!("Query returned more than {} rows:", rows.total_rows)
    } else {
        format!("Query returned {} rows:", rows.total_rows)
    };
    for (index, row) in rows.rows.iter().enumerate() {
        let rendered = Value::Object(row.clone()).to_string();
        output.push_str(&format!("\nRow {}: {rendered}", index + 1));
    }
    let hidden = rows.truncated();
    if rows.count_capped {
        output.push_str(&format!("\n... and more than {hidden} more rows"));
    } else if hidden > 0 {
        output.push_str(&format!("\n... and {hidden} more rows"));
    }
    output
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use datasage_core::analytics::QueryRows;

    use super::{format_amount, render_rows};

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn amounts_get_grouping_and_two_decimals() {
        assert_eq!(format_amount(204_593.89), "204,593.89");
        assert_eq!(format_amount(1_000_000.0), "1,000,000.00");
        assert_eq!(format_amount(999.999), "1,000.00");
        assert_eq!(format_amount(12.5), "12.50");
        assert_eq!(format_amount(-4_321.0), "-4,321.00");
        assert_eq!(format_amount(-0.001), "0.00");
    }

    #[test]
    fn rows_render_with_truncation_note() {
        let rows = QueryRows {
            rows: vec![row(json!({"region": "North"})), row(json!({"region": "South"}))],
            total_rows: 4,
            count_capped: false,
        };

        assert_eq!(
            render_rows(&rows),
            "Query returned 4 rows:\nRow 1: {\"region\":\"North\"}\nRow 2: {\"region\":\"South\"}\n... and 2 more rows"
        );
    }

    #[test]
    fn capped_count_is_reported_as_a_lower_bound() {
        let rows = QueryRows {
            rows: vec![row(json!({"x": 1}))],
            total_rows: 10_000,
            count_capped: true,
        };

        assert_eq!(
            render_rows(&rows),
            "Query returned more than 10000 rows:\nRow 1: {\"x\":1}\n... and more than 9999 more rows"
        );
    }

    #[test]
    fn empty_result_has_fixed_message() {
        assert_eq!(
            render_rows(&QueryRows::default()),
            "Query executed successfully but returned no results."
        );
    }
}
