//! agent-cli - command-line client for the shellagent HTTP API
//!
//! ```text
//! agent-cli send-message -m "list files" [-c work] [--stream]
//! agent-cli get-conv -i work
//! agent-cli list-conv
//! agent-cli list-processes
//! agent-cli kill-process --pid 4242
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;

use shellagent::conversation::{ConversationSummary, Message};
use shellagent::process::ProcessRecord;
use shellagent::server::api::{
    ConversationSnapshot, ErrorBody, KillResponse, SendMessageRequest, SendMessageResponse,
};

/// Talk to a running shellagent server
#[derive(Debug, Parser)]
#[command(name = "agent-cli", version)]
struct Cli {
    /// Server base URL
    #[arg(
        short,
        long,
        global = true,
        env = "SHELLAGENT_SERVER",
        default_value = "http://localhost:8080"
    )]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a message and print the messages it produced
    SendMessage {
        #[arg(short, long)]
        message: String,
        /// Conversation id (server default when omitted)
        #[arg(short, long)]
        conversation: Option<String>,
        /// Print messages as they are appended
        #[arg(long)]
        stream: bool,
    },
    /// Print a conversation
    GetConv {
        #[arg(short, long)]
        id: String,
    },
    /// List conversations, most recent first
    ListConv,
    /// List background processes
    ListProcesses,
    /// Kill a background process
    KillProcess {
        #[arg(long)]
        pid: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let base = cli.server.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    match cli.command {
        Command::SendMessage {
            message,
            conversation,
            stream,
        } => {
            let body = SendMessageRequest {
                message,
                conversation_id: conversation,
            };
            if stream {
                stream_message(&client, &base, &body).await?;
            } else {
                let response = client
                    .post(format!("{base}/api/chat"))
                    .json(&body)
                    .send()
                    .await
                    .context("failed to reach server")?;
                let reply: SendMessageResponse = read_json(response).await?;
                for message in &reply.messages {
                    print_message(message);
                }
                if reply.completion != "finished" {
                    eprintln!("(turn ended: {})", reply.completion);
                }
            }
        }
        Command::GetConv { id } => {
            let response = client
                .get(format!("{base}/api/conversations/{id}"))
                .send()
                .await
                .context("failed to reach server")?;
            let conversation: ConversationSnapshot = read_json(response).await?;
            println!("Conversation {} ({} messages)", conversation.id, conversation.messages.len());
            for message in &conversation.messages {
                print_message(message);
            }
        }
        Command::ListConv => {
            let response = client
                .get(format!("{base}/api/conversations"))
                .send()
                .await
                .context("failed to reach server")?;
            let conversations: Vec<ConversationSummary> = read_json(response).await?;
            if conversations.is_empty() {
                println!("No conversations.");
            }
            for conv in conversations {
                println!(
                    "{}  {} messages  updated {}",
                    conv.id,
                    conv.message_count,
                    conv.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::ListProcesses => {
            let response = client
                .get(format!("{base}/api/processes"))
                .send()
                .await
                .context("failed to reach server")?;
            let processes: Vec<ProcessRecord> = read_json(response).await?;
            if processes.is_empty() {
                println!("No background processes running.");
            }
            for p in processes {
                println!(
                    "PID: {} | Command: {} | Started: {}",
                    p.pid,
                    p.command,
                    p.started_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::KillProcess { pid } => {
            let response = client
                .post(format!("{base}/api/processes/{pid}/kill"))
                .send()
                .await
                .context("failed to reach server")?;
            let killed: KillResponse = read_json(response).await?;
            println!("{}", killed.message);
        }
    }

    Ok(())
}

async fn stream_message(
    client: &reqwest::Client,
    base: &str,
    body: &SendMessageRequest,
) -> anyhow::Result<()> {
    let response = client
        .post(format!("{base}/api/chat/stream"))
        .json(body)
        .send()
        .await
        .context("failed to reach server")?;
    if !response.status().is_success() {
        return read_json::<serde_json::Value>(response).await.map(|_| ());
    }

    let mut bytes_stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = bytes_stream.next().await {
        let chunk = chunk.context("stream interrupted")?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline).collect();
            let Some(data) = line.trim_end().strip_prefix("data:") else {
                continue;
            };
            let event: serde_json::Value = match serde_json::from_str(data.trim_start()) {
                Ok(event) => event,
                Err(_) => continue,
            };

            match event["type"].as_str() {
                Some("message") => {
                    let message: Message = serde_json::from_value(event["message"].clone())
                        .context("malformed message event")?;
                    print_message(&message);
                }
                Some("done") => {
                    if let Some(completion) = event["completion"].as_str() {
                        if completion != "finished" {
                            eprintln!("(turn ended: {completion})");
                        }
                    }
                    return Ok(());
                }
                Some("error") => {
                    bail!("{}", event["error"].as_str().unwrap_or("unknown error"));
                }
                _ => {}
            }
        }
    }

    Ok(())
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> anyhow::Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or(text);
        bail!("server returned {status}: {message}");
    }
    response.json().await.context("malformed response body")
}

fn print_message(message: &Message) {
    println!("[{}]: {}", message.role, message.content);
    for call in &message.tool_calls {
        println!("  -> {}({})", call.name, call.arguments);
    }
}
