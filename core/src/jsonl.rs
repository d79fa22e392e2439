//! JSON Lines parsing.

use serde_json::Value;
use tracing::trace;

use crate::error::ParseError;
use crate::table::is_blank;

/// Parse newline-delimited JSON, one document per line, in input order.
///
/// Blank lines are not skipped: like any other line that is not a JSON
/// document they fail with `ParseError::MalformedLine`.
pub fn parse_lines(input: &str) -> Result<Vec<Value>, ParseError> {
    let values = input
        .trim_matches(is_blank)
        .split('\n')
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| ParseError::MalformedLine { index, source })
        })
        .collect::<Result<Vec<Value>, _>>()?;
    trace!(count = values.len(), "parsed JSONL input");
    Ok(values)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_each_line_in_order() {
        let values = parse_lines("{\"x\":1}\n{\"y\":[1,2]}\n").unwrap();
        assert_eq!(values, vec![json!({"x": 1}), json!({"y": [1, 2]})]);
    }

    #[test]
    fn each_element_matches_parsing_the_line_alone() {
        let lines = ["1", "\"two\"", "[3]", "null", "{\"five\":true}"];
        let values = parse_lines(&lines.join("\n")).unwrap();
        assert_eq!(values.len(), lines.len());
        for (value, line) in values.iter().zip(lines) {
            assert_eq!(*value, serde_json::from_str::<Value>(line).unwrap());
        }
    }

    #[test]
    fn blank_line_is_malformed() {
        let err = parse_lines("{\"a\":1}\n\n{\"b\":2}").unwrap_err();
        assert!(matches!(err, ParseError::MalformedLine { index: 1, .. }));
    }

    #[test]
    fn first_bad_line_is_reported() {
        let err = parse_lines("1\n{oops\n[unclosed").unwrap_err();
        assert!(matches!(err, ParseError::MalformedLine { index: 1, .. }));
        assert!(err.to_string().starts_with("line 2 is not valid JSON"));
    }

    #[test]
    fn leading_byte_order_mark_is_ignored() {
        let values = parse_lines("\u{feff}{\"a\":1}\n{\"b\":2}").unwrap();
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn empty_input_fails_on_first_line() {
        let err = parse_lines("").unwrap_err();
        assert!(matches!(err, ParseError::MalformedLine { index: 0, .. }));
    }
}
