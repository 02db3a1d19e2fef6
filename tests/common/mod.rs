// Shared helpers for integration tests: fake workers written in sh

#![allow(dead_code)]

use matchscribe::config::WorkerConfig;
use std::collections::HashMap;

/// Extracts the numeric request id of the line just read into `$id`
const READ_ID: &str = r#"id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')"#;

/// A worker config running `body` for every request line. The body sees
/// the request in `$line` and its id in `$id`.
pub fn worker_per_request(body: &str) -> WorkerConfig {
    let script = format!("while IFS= read -r line; do\n{}\n{}\ndone", READ_ID, body);
    sh_worker(&script)
}

/// A worker config running an arbitrary sh script
pub fn sh_worker(script: &str) -> WorkerConfig {
    WorkerConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: HashMap::new(),
        env_passthrough: Vec::new(),
    }
}

/// Streams progress, three segments, then a typed result
pub fn three_segment_worker() -> WorkerConfig {
    worker_per_request(
        r#"printf '{"type":"progress","id":%s,"progress_pct":10.0}\n' "$id"
printf '{"type":"segment","id":%s,"data":{"start":0.0,"end":1.2,"text":" Kick off"}}\n' "$id"
printf '{"type":"segment","id":%s,"data":{"start":1.2,"end":2.5,"text":" in Madrid"}}\n' "$id"
printf '{"type":"progress","id":%s,"progress_pct":66.7}\n' "$id"
printf '{"type":"segment","id":%s,"data":{"start":2.5,"end":4.0,"text":" tonight."}}\n' "$id"
printf '{"type":"progress","id":%s,"progress_pct":100.0}\n' "$id"
printf '{"type":"result","id":%s,"result":{"language":"en","language_probability":0.98,"duration":4.0,"text":"Kick off in Madrid tonight.","segments":[]}}\n' "$id""#,
    )
}

/// Streams one segment and then never answers
pub fn hanging_worker() -> WorkerConfig {
    worker_per_request(
        r#"printf '{"type":"segment","id":%s,"data":{"start":0.0,"end":1.0,"text":" Warm up"}}\n' "$id"
sleep 30"#,
    )
}
