//! Tool definitions advertised to the model

use crate::llm::{Tool, ToolFunction};

pub const RUN_COMMAND: &str = "run_command";
pub const LIST_PROCESSES: &str = "list_processes";
pub const KILL_PROCESS: &str = "kill_process";

/// The fixed tool catalog sent with every chat request
pub fn tool_catalog() -> Vec<Tool> {
    vec![run_command_tool(), list_processes_tool(), kill_process_tool()]
}

fn function(name: &str, description: &str, parameters: serde_json::Value) -> Tool {
    Tool {
        tool_type: "function".to_string(),
        function: ToolFunction {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        },
    }
}

fn run_command_tool() -> Tool {
    function(
        RUN_COMMAND,
        "Run a shell command. By default the command runs to completion and its combined stdout and stderr are returned. Set background to true for long-running commands (servers, watchers); the PID is returned immediately instead of the output.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command line to run"
                },
                "background": {
                    "type": "boolean",
                    "description": "Run the command in the background and return its PID"
                }
            },
            "required": ["command"]
        }),
    )
}

fn list_processes_tool() -> Tool {
    function(
        LIST_PROCESSES,
        "List the background processes started with run_command, with their PID, command and running time.",
        serde_json::json!({
            "type": "object",
            "properties": {}
        }),
    )
}

fn kill_process_tool() -> Tool {
    function(
        KILL_PROCESS,
        "Stop a background process and everything it spawned.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "pid": {
                    "type": "integer",
                    "description": "PID of the background process"
                }
            },
            "required": ["pid"]
        }),
    )
}
