mod common;

use std::{
    io::Write,
    path::PathBuf,
    time::Duration,
};

use orchestrator_core::{
    config::OrchestratorConfig,
    envelope::Envelope,
    mcp::InterpreterKind,
    orchestrator::Orchestrator,
    registry::PeerKind,
};
use serde_json::json;

/// A minimal line-based MCP child: answers `initialize`, `list_tools` with a
/// single `add` tool, and `tool_call` by summing `a` and `b`.
const ADDER_SCRIPT: &str = r#"
import sys, json

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    request = json.loads(line)
    rid = request["id"]
    kind = request["type"]
    if kind == "initialize":
        reply = {"id": rid, "result": {"ok": True}}
    elif kind == "list_tools":
        reply = {"id": rid, "tools": [{"name": "add", "description": "adds two numbers", "inputSchema": {}}]}
    elif kind == "tool_call":
        args = request["tool"]["args"]
        reply = {"id": rid, "result": {"sum": args["a"] + args["b"]}}
    elif kind == "shutdown":
        reply = {"id": rid, "result": {"ok": True}}
        print(json.dumps(reply))
        sys.stdout.flush()
        break
    else:
        reply = {"id": rid, "error": f"unknown request type {kind}"}
    print(json.dumps(reply))
    sys.stdout.flush()
"#;

struct TempScript {
    path: PathBuf,
}

impl TempScript {
    fn write(contents: &str) -> Self {
        let path = std::env::temp_dir().join(format!("orchestrator-mcp-test-{}.py", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        Self { path }
    }
}

impl Drop for TempScript {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// An agent calls `mcp.tool.execute` against a declared MCP server; the
/// supervisor spawns the child on first use, performs the handshake, and
/// forwards the tool's result back as `mcp.tool.result` (spec §4.5, §4.6,
/// spec §8 scenario 5).
#[tokio::test]
async fn agent_calls_mcp_tool_and_gets_result() {
    let script = TempScript::write(ADDER_SCRIPT);

    let config = OrchestratorConfig {
        agent_port: 0,
        client_port: 0,
        service_port: 0,
        task_timeout: Duration::from_secs(5),
        mcp_servers: vec![orchestrator_core::config::DeclaredMcpServer {
            name: "adder".to_owned(),
            script_path: script.path.clone(),
            interpreter: InterpreterKind::Python,
            capabilities: vec![],
        }],
        ..Default::default()
    };

    let orchestrator = Orchestrator::new(&config).await;
    let handle = orchestrator.start(&config).await.unwrap();

    let mut agent = common::connect(&handle, PeerKind::Agent).await;
    common::send(&mut agent, &Envelope::new("agent.register", json!({ "name": "mathy" }))).await;
    assert_eq!(common::recv(&mut agent).await.message_type, "agent.registered");

    common::send(
        &mut agent,
        &Envelope::new(
            "mcp.tool.execute",
            json!({ "serverId": "adder", "toolName": "add", "parameters": { "a": 2, "b": 3 } }),
        ),
    )
    .await;

    let reply = common::recv(&mut agent).await;
    assert_eq!(reply.message_type, "mcp.tool.result");
    assert_eq!(reply.content["result"]["sum"], 5);

    handle.stop().await.unwrap();
}
