//! Test support: scripted tool servers
//!
//! Builds tiny `sh` scripts that speak just enough NDJSON JSON-RPC to
//! complete the handshake, so connection and client tests can run against
//! a real subprocess with real pipes.

use crate::config::ServerConfig;
use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;

/// Knobs for the scripted server's behavior after the handshake
#[derive(Debug, Clone, Copy)]
pub struct ScriptOptions {
    /// Answer `tools/call` requests; when false they are swallowed so
    /// callers stay pending until teardown
    pub respond_to_calls: bool,

    /// Exit right after answering the handshake's last list request
    pub exit_after_handshake: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            respond_to_calls: true,
            exit_after_handshake: false,
        }
    }
}

const SCRIPT_TEMPLATE: &str = r#"#!/bin/sh
# Scripted tool server: one JSON message per line on stdio.
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  case "$line" in
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":"%s","result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"scripted","version":"0.0.1"}}}\n' "$id"
      ;;
    *'"tools/call"'*)
      @CALL@
      ;;
    *'"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":"%s","result":{"tools":[{"name":"echo_text","description":"Echo text back","inputSchema":{"type":"object"}}]}}\n' "$id"
      ;;
    *'"resources/list"'*)
      printf '{"jsonrpc":"2.0","id":"%s","error":{"code":-32601,"message":"resources not supported"}}\n' "$id"
      ;;
    *'"prompts/list"'*)
      printf '{"jsonrpc":"2.0","id":"%s","result":{"prompts":[]}}\n' "$id"
      @EXIT@
      ;;
    *) : ;;
  esac
done
"#;

const CALL_REPLY: &str = r#"printf '{"jsonrpc":"2.0","id":"%s","result":{"content":[{"type":"text","text":"echoed"}]}}\n' "$id""#;

/// Write a scripted server to disk and build a config launching it
///
/// The returned tempfile must stay alive for as long as the server may be
/// (re)spawned.
pub fn scripted_server(name: &str, options: ScriptOptions) -> (NamedTempFile, ServerConfig) {
    let call_case = if options.respond_to_calls {
        CALL_REPLY
    } else {
        ":"
    };
    let exit_case = if options.exit_after_handshake {
        "exit 0"
    } else {
        ":"
    };

    let script = SCRIPT_TEMPLATE
        .replace("@CALL@", call_case)
        .replace("@EXIT@", exit_case);

    let mut file = NamedTempFile::new().expect("failed to create script tempfile");
    file.write_all(script.as_bytes())
        .expect("failed to write script");
    file.flush().expect("failed to flush script");

    let config = ServerConfig {
        name: name.to_string(),
        description: Some("scripted test server".to_string()),
        command: "sh".to_string(),
        args: vec![file.path().to_string_lossy().into_owned()],
        env: HashMap::new(),
    };

    (file, config)
}
