//! JSON output formatting
//!
//! Realtime events are printed one JSON document per line so a consumer can
//! follow the stream as it runs.

use serde::Serialize;
use soundprint_core::matching::{QueryResult, ResultEntry};
use soundprint_core::realtime::SessionStats;

/// One line of `fprealtime` output
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent<'a> {
    Success { result: &'a QueryResult },
    DidNotPass { result: &'a QueryResult },
    Ongoing { entry: &'a ResultEntry },
    Error {
        message: String,
        /// Start of the window whose query failed; absent for source errors
        #[serde(skip_serializing_if = "Option::is_none")]
        window_starts_at: Option<f64>,
    },
    Restored,
    Finished { stats: &'a SessionStats },
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing output: {}", e),
    }
}

/// Print a realtime event as a single JSON line
pub fn print_event(event: &RealtimeEvent<'_>) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing event: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soundprint_core::matching::TrackInfo;

    #[test]
    fn test_event_tags() {
        let result = QueryResult::new(
            "stream",
            vec![ResultEntry {
                track: TrackInfo::new("t1", "Title", "Artist", 180.0),
                query_match_starts_at: 1.0,
                track_match_starts_at: 11.0,
                match_length: 6.0,
                track_coverage_s: 6.0,
                score: 120.0,
                hashes_matched: 30,
                confidence: 0.8,
            }],
        );

        let json = serde_json::to_value(RealtimeEvent::Success { result: &result }).unwrap();
        assert_eq!(json["event"], "success");
        assert_eq!(json["result"]["entries"][0]["track"]["id"], "t1");

        let json = serde_json::to_value(RealtimeEvent::DidNotPass { result: &result }).unwrap();
        assert_eq!(json["event"], "did_not_pass");

        let json = serde_json::to_value(RealtimeEvent::Error {
            message: "down".to_string(),
            window_starts_at: None,
        })
        .unwrap();
        assert_eq!(json["event"], "error");
        assert!(json.get("window_starts_at").is_none());

        let json = serde_json::to_value(RealtimeEvent::Restored).unwrap();
        assert_eq!(json, serde_json::json!({ "event": "restored" }));
    }
}
