#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub struct Sidecar {
    pub child: Child,
    pub stdin: ChildStdin,
    pub reader: BufReader<ChildStdout>,
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn temp_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("attendanced-test-")
        .tempdir()
        .expect("create temp dir")
}

/// Spawns the daemon on a replay clock so check-in times are deterministic.
pub fn spawn_sidecar(db: &Path, fixed_clock: &str) -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .arg("--db")
        .arg(db)
        .arg("--fixed-clock")
        .arg(fixed_clock)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
    }
}

pub fn send(sidecar: &mut Sidecar, id: &str, method: &str, params: serde_json::Value) {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(sidecar.stdin, "{}", payload).expect("write request");
    sidecar.stdin.flush().expect("flush request");
}

pub fn read_response(sidecar: &mut Sidecar, id: &str) -> serde_json::Value {
    let mut line = String::new();
    sidecar.reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", id);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request(
    sidecar: &mut Sidecar,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    send(sidecar, id, method, params);
    read_response(sidecar, id)
}

pub fn request_ok(
    sidecar: &mut Sidecar,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(sidecar, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(json!({}))
}

pub fn request_err(
    sidecar: &mut Sidecar,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(sidecar, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().unwrap_or("unknown").to_string()
}

/// Class "C1" (capacity 2) with students B1 and B2; returns (class_id, s1, s2).
pub fn seed_c1(sidecar: &mut Sidecar) -> (String, String, String) {
    let class = request_ok(
        sidecar,
        "seed-c",
        "classes.create",
        json!({ "name": "C1", "gradeLevel": "Grade 1", "capacity": 2 }),
    );
    let class_id = class["id"].as_str().expect("class id").to_string();
    let mut ids = Vec::new();
    for (barcode, name) in [("B1", "Sara"), ("B2", "Omar")] {
        let s = request_ok(
            sidecar,
            "seed-s",
            "students.create",
            json!({
                "barcode": barcode,
                "name": name,
                "classId": class_id,
                "parentPhone": "+20 100 000 0000",
            }),
        );
        ids.push(s["id"].as_str().expect("student id").to_string());
    }
    (class_id, ids[0].clone(), ids[1].clone())
}
