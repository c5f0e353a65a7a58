//! JSON envelopes for results and errors.
//!
//! The success shape mirrors what foreign callers already consume: measured
//! RTT in nanoseconds, the full flag set and one entry per answer record.
//! Errors become a structured envelope with the cause chain innermost-first
//! and a trimmed stack capture.

use backtrace::Backtrace;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::client::QueryOutcome;
use crate::error::DnsError;
use crate::message::{class_to_str, type_to_str, TYPE_OPT};

/// Render an exchange result; foreign callers always get a JSON string.
pub fn render(result: Result<QueryOutcome, DnsError>) -> String {
    match result {
        Ok(outcome) => render_outcome(&outcome),
        Err(err) => render_error(&err),
    }
}

pub fn render_outcome(outcome: &QueryOutcome) -> String {
    let message = &outcome.message;
    let header = &message.header;
    let answers: Vec<Value> = message
        .answers
        .iter()
        .filter(|record| record.rtype != TYPE_OPT)
        .map(|record| {
            json!({
                "name": record.name,
                "type": type_to_str(record.rtype),
                "class": class_to_str(record.rclass),
                "ttl": record.ttl,
                "result": record.result_text(),
                "data": record.presentation(),
            })
        })
        .collect();

    json!({
        "rtt": outcome.rtt.as_nanos() as u64,
        "flags": {
            "qr": header.response,
            "opcode": header.opcode,
            "aa": header.authoritative,
            "tc": header.truncated,
            "rd": header.recursion_desired,
            "ra": header.recursion_available,
            "z": header.zero,
            "ad": header.authenticated_data,
            "cd": header.checking_disabled,
            "rcode": header.rcode,
        },
        "answer": answers,
    })
    .to_string()
}

pub fn render_error(err: &DnsError) -> String {
    // Cause chain in unwrap order, the failing error down to its root.
    let mut causes = Vec::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        causes.push(e.to_string());
        current = e.source();
    }

    let stack = capture_stack();
    let where_field = stack
        .first()
        .and_then(|frame| {
            let file = frame.get("file")?.as_str()?;
            let line = frame.get("line")?.as_u64()?;
            Some(format!("{file}:{line}"))
        })
        .unwrap_or_default();

    json!({
        "code": -1,
        "message": causes.join(": "),
        "type": format!("DnsError::{}", err.kind()),
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        "where": where_field,
        "causes": causes,
        "stack": stack,
    })
    .to_string()
}

fn capture_stack() -> Vec<Value> {
    const MAX_FRAMES: usize = 32;
    let backtrace = Backtrace::new();
    let mut frames = Vec::new();
    for frame in backtrace.frames() {
        for symbol in frame.symbols() {
            let func = match symbol.name() {
                Some(name) => name.to_string(),
                None => continue,
            };
            if is_internal_frame(&func) {
                continue;
            }
            frames.push(json!({
                "func": func,
                "file": symbol
                    .filename()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                "line": symbol.lineno().unwrap_or(0),
            }));
            if frames.len() >= MAX_FRAMES {
                return frames;
            }
        }
    }
    frames
}

fn is_internal_frame(func: &str) -> bool {
    const INTERNAL_PREFIXES: &[&str] = &[
        "std::",
        "core::",
        "alloc::",
        "tokio::",
        "backtrace::",
        "rust_begin_unwind",
        "__",
        "_start",
        "clone",
        "start_thread",
        "dnsprobe::render::",
    ];
    INTERNAL_PREFIXES.iter().any(|p| func.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Rdata, Record, CLASS_IN, TYPE_A};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn outcome() -> QueryOutcome {
        let mut message = Message::query("example.com", "A", "IN").unwrap();
        message.header.response = true;
        message.header.recursion_available = true;
        message.answers.push(Record {
            name: "example.com.".into(),
            rtype: TYPE_A,
            rclass: CLASS_IN,
            ttl: 300,
            rdata: Rdata::A(Ipv4Addr::new(93, 184, 216, 34)),
        });
        QueryOutcome {
            message,
            rtt: Duration::from_millis(12),
        }
    }

    #[test]
    fn success_envelope_shape() {
        let rendered = render_outcome(&outcome());
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["rtt"].as_u64(), Some(12_000_000));
        assert_eq!(value["flags"]["qr"], true);
        assert_eq!(value["flags"]["rd"], true);
        assert_eq!(value["flags"]["rcode"], 0);
        let answer = &value["answer"][0];
        assert_eq!(answer["name"], "example.com.");
        assert_eq!(answer["type"], "A");
        assert_eq!(answer["class"], "IN");
        assert_eq!(answer["ttl"], 300);
        assert_eq!(answer["result"], "93.184.216.34");
        assert!(answer["data"].as_str().unwrap().contains("93.184.216.34"));
    }

    #[test]
    fn error_envelope_shape() {
        let rendered = render_error(&DnsError::EmptyServer);
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["code"], -1);
        assert!(value["message"].as_str().unwrap().contains("empty server"));
        assert_eq!(value["type"], "DnsError::EmptyServer");
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
        assert!(value["causes"].as_array().unwrap().len() >= 1);
        assert!(value["stack"].is_array());
    }

    #[test]
    fn error_envelope_includes_cause_chain() {
        let err = DnsError::Dial {
            address: "127.0.0.1:53".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        let value: Value = serde_json::from_str(&render_error(&err)).unwrap();
        let causes = value["causes"].as_array().unwrap();
        assert_eq!(causes.len(), 2);
        assert!(causes[0].as_str().unwrap().contains("dial"));
        assert!(causes[1].as_str().unwrap().contains("refused"));
        assert!(value["message"].as_str().unwrap().contains("refused"));
    }
}
