//! Line-oriented requests on stdin
//!
//! Each line is one JSON object, either an entity command
//!
//! ```json
//! {"device": "0583f0a4", "entity": "switch", "payload": {"state": "ON"}}
//! ```
//!
//! or a query such as `{"query": "status"}`.

use enolink_esp3::DeviceId;
use serde::Deserialize;
use serde_json::Value;

/// What can be asked of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Query {
    /// Gateway link status
    Status,
    /// Configured devices
    Devices,
    /// Rescan the profile directory
    Reload,
}

/// A parsed request line
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Request {
    Command {
        device: DeviceId,
        entity: String,
        payload: Value,
    },
    Query {
        query: Query,
    },
}

/// Parse one input line; blank lines and `#` comments yield `None`
pub fn parse_line(line: &str) -> Option<Result<Request, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(serde_json::from_str(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_line() {
        let request = parse_line(r#"{"device": "05:83:F0:A4", "entity": "switch", "payload": {"state": "ON"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            request,
            Request::Command {
                device: DeviceId([0x05, 0x83, 0xF0, 0xA4]),
                entity: "switch".to_string(),
                payload: json!({"state": "ON"}),
            }
        );
    }

    #[test]
    fn test_query_line() {
        assert_eq!(
            parse_line(r#"{"query": "status"}"#).unwrap().unwrap(),
            Request::Query { query: Query::Status }
        );
        assert_eq!(
            parse_line(r#"{"query": "reload"}"#).unwrap().unwrap(),
            Request::Query { query: Query::Reload }
        );
    }

    #[test]
    fn test_skipped_and_invalid_lines() {
        assert!(parse_line("   ").is_none());
        assert!(parse_line("# lights").is_none());
        assert!(parse_line(r#"{"device": "nothex", "entity": "x", "payload": 1}"#)
            .unwrap()
            .is_err());
        assert!(parse_line(r#"{"query": "everything"}"#).unwrap().is_err());
    }
}
