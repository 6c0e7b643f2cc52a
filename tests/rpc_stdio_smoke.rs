use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

#[test]
fn rpc_stdio_smoke() {
    // `cargo test` sets this for integration tests.
    let bin = env!("CARGO_BIN_EXE_gitme");
    let workdir = tempfile::TempDir::new().expect("tempdir");

    let mut child = Command::new(bin)
        .arg("serve")
        .current_dir(workdir.path())
        .env_remove("GEMINI_API_KEY")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gitme serve");

    {
        let stdin = child.stdin.as_mut().expect("child stdin");

        // Keep each JSON-RPC message on one line (server reads by lines()).
        let messages = [
            serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": "healthCheck" }),
            serde_json::json!({ "jsonrpc": "2.0", "method": "initialized" }),
            serde_json::json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }),
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "fetchRepo",
                "params": { "url": "https://example.com/not/github" }
            }),
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "generateReadme",
                "params": {
                    "repo": "octo/demo",
                    "files": [ { "path": "README.md", "size": 6, "content": "# demo" } ]
                }
            }),
            serde_json::json!({ "jsonrpc": "2.0", "id": 5, "method": "tools/list" }),
        ];
        for msg in messages {
            writeln!(stdin, "{msg}").unwrap();
        }
        writeln!(stdin, "this line is not json").unwrap();
    }

    // Close stdin so the server loop can exit.
    drop(child.stdin.take());

    let stdout = child.stdout.take().expect("child stdout");
    let reader = BufReader::new(stdout);

    let mut replies_by_id: HashMap<i64, serde_json::Value> = HashMap::new();

    for line in reader.lines() {
        let line = line.expect("read stdout line");
        if line.trim().is_empty() {
            continue;
        }
        let v: serde_json::Value = serde_json::from_str(&line).expect("stdout is json");
        let id = v
            .get("id")
            .and_then(|x| x.as_i64())
            .expect("json-rpc response id");
        replies_by_id.insert(id, v);
    }

    let status = child.wait().expect("wait child");
    assert!(status.success(), "serve process should exit cleanly");
    assert_eq!(replies_by_id.len(), 5, "notification and garbage must not be answered");

    // healthCheck
    {
        let v = replies_by_id.get(&1).expect("healthCheck reply");
        assert_eq!(v.get("jsonrpc").and_then(|x| x.as_str()), Some("2.0"));
        assert_eq!(v.get("result").and_then(|x| x.as_str()), Some("OK"));
    }

    // ping
    {
        let v = replies_by_id.get(&2).expect("ping reply");
        assert!(v.get("result").is_some_and(|r| r.is_object()));
    }

    // fetchRepo with a non-GitHub URL fails before any download
    {
        let v = replies_by_id.get(&3).expect("fetchRepo reply");
        let error = v.get("error").expect("fetchRepo error");
        assert_eq!(error.get("code").and_then(|c| c.as_i64()), Some(-32000));
        let message = error.get("message").and_then(|m| m.as_str()).unwrap_or("");
        assert!(message.contains("invalid GitHub repository URL"), "got: {message}");
    }

    // generateReadme without an API key
    {
        let v = replies_by_id.get(&4).expect("generateReadme reply");
        let message = v
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .expect("generateReadme error message");
        assert!(message.contains("GEMINI_API_KEY not configured"), "got: {message}");
    }

    // unknown method
    {
        let v = replies_by_id.get(&5).expect("tools/list reply");
        assert_eq!(
            v.get("error").and_then(|e| e.get("code")).and_then(|c| c.as_i64()),
            Some(-32601)
        );
    }
}
