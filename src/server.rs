use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::io::{BufRead, Write};

use crate::config::Config;
use crate::gemini::{GeminiClient, TextGenerator};
use crate::github::{ArchiveFetcher, CodeloadClient};
use crate::readme::{fetch_repo, generate_readme, FetchRequest, GenerateRequest};

const INVALID_PARAMS: i64 = -32602;
const METHOD_NOT_FOUND: i64 = -32601;
const OPERATION_FAILED: i64 = -32000;

/// Builds the generation client lazily, so a missing API key only fails
/// `generateReadme` calls instead of the whole server.
type GeneratorFactory = Box<dyn Fn(&Config) -> Result<Box<dyn TextGenerator>>>;

pub struct ServerState {
    cfg: Config,
    fetcher: Box<dyn ArchiveFetcher>,
    generator: GeneratorFactory,
}

impl ServerState {
    pub fn new(cfg: Config) -> Self {
        let fetcher = Box::new(CodeloadClient::new(&cfg.archive));
        Self {
            cfg,
            fetcher,
            generator: Box::new(|cfg: &Config| {
                let client = GeminiClient::from_config(&cfg.generation)?;
                Ok(Box::new(client) as Box<dyn TextGenerator>)
            }),
        }
    }

    pub fn with_backends(cfg: Config, fetcher: Box<dyn ArchiveFetcher>, generator: GeneratorFactory) -> Self {
        Self { cfg, fetcher, generator }
    }

    fn params<T: DeserializeOwned>(msg: &serde_json::Value) -> Result<T, String> {
        let params = msg.get("params").cloned().unwrap_or(json!({}));
        serde_json::from_value(params).map_err(|e| format!("invalid params: {e}"))
    }

    /// Handle one parsed message. `None` for notifications.
    pub fn handle(&self, msg: &serde_json::Value) -> Option<serde_json::Value> {
        // Notifications carry no "id" and get no reply.
        let id = msg.get("id")?.clone();
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");

        let ok = |result: serde_json::Value| json!({ "jsonrpc": "2.0", "id": id, "result": result });
        let err = |code: i64, message: String| {
            json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
        };

        let reply = match method {
            "healthCheck" => ok(json!("OK")),
            "ping" => ok(json!({})),
            "fetchRepo" => match Self::params::<FetchRequest>(msg) {
                Err(m) => err(INVALID_PARAMS, m),
                Ok(req) => match fetch_repo(&req, &self.cfg, self.fetcher.as_ref()) {
                    Ok(snapshot) => ok(json!(snapshot)),
                    Err(e) => err(OPERATION_FAILED, format!("{e:#}")),
                },
            },
            "generateReadme" => match Self::params::<GenerateRequest>(msg) {
                Err(m) => err(INVALID_PARAMS, m),
                Ok(req) => {
                    let result = (self.generator)(&self.cfg)
                        .and_then(|g| generate_readme(&req, &self.cfg, g.as_ref()));
                    match result {
                        Ok(out) => ok(json!(out)),
                        Err(e) => err(OPERATION_FAILED, format!("{e:#}")),
                    }
                }
            },
            _ => err(METHOD_NOT_FOUND, format!("Method not found: {method}")),
        };
        Some(reply)
    }
}

/// Serve line-delimited JSON-RPC until stdin closes.
pub fn run_stdio_server(cfg: Config) -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(&ServerState::new(cfg), stdin.lock(), stdout.lock())
}

pub fn serve<R: BufRead, W: Write>(state: &ServerState, input: R, mut output: W) -> Result<()> {
    for line in input.lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparsable line");
                continue;
            }
        };

        if let Some(reply) = state.handle(&msg) {
            writeln!(output, "{}", reply)?;
            output.flush()?;
        }
    }

    Ok(())
}
