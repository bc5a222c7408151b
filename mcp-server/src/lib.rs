//! MCP server over stdio: reads JSON-RPC frames line by line, dispatches
//! them onto the refinement engine, and writes responses back. stdout is
//! reserved for the wire; all diagnostics go to stderr via `tracing`.
#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::io::Result as IoResult;
use std::sync::Arc;

use mcp_types::JSONRPCMessage;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::{self};
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use anneal_core::SessionRegistry;
use anneal_core::fs::RealFs;

mod message_processor;
mod tool_config;
mod tool_handlers;

use crate::message_processor::MessageProcessor;

/// Size of the bounded channels between the stdio tasks. Tool traffic is
/// interactive; a small buffer is plenty.
const CHANNEL_CAPACITY: usize = 128;

pub async fn run_main() -> IoResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let (incoming_tx, mut incoming_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);

    // Task: read frames from stdin.
    let stdin_reader_handle = tokio::spawn({
        let incoming_tx = incoming_tx.clone();
        async move {
            let stdin = io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<JSONRPCMessage>(&line) {
                    Ok(msg) => {
                        if incoming_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("failed to deserialize JSONRPCMessage: {e}"),
                }
            }

            debug!("stdin reader finished (EOF)");
        }
    });

    // Task: process incoming messages against the session registry.
    let processor_handle = tokio::spawn({
        let registry = Arc::new(SessionRegistry::new());
        let fs: Arc<dyn anneal_core::fs::Fs> = Arc::new(RealFs);
        let mut processor = MessageProcessor::new(outgoing_tx.clone(), registry, fs);
        async move {
            while let Some(msg) = incoming_rx.recv().await {
                match msg {
                    JSONRPCMessage::Request(r) => processor.process_request(r),
                    JSONRPCMessage::Notification(n) => processor.process_notification(n),
                    JSONRPCMessage::Response(r) => processor.process_response(r),
                    JSONRPCMessage::Error(e) => processor.process_error(e),
                }
            }

            info!("processor task exited (channel closed)");
        }
    });

    // Task: write outgoing frames to stdout, one per line.
    let stdout_writer_handle = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(msg) = outgoing_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if let Err(e) = stdout.write_all(json.as_bytes()).await {
                        error!("failed to write to stdout: {e}");
                        break;
                    }
                    if let Err(e) = stdout.write_all(b"\n").await {
                        error!("failed to write newline to stdout: {e}");
                        break;
                    }
                    if let Err(e) = stdout.flush().await {
                        error!("failed to flush stdout: {e}");
                        break;
                    }
                }
                Err(e) => error!("failed to serialize JSONRPCMessage: {e}"),
            }
        }

        info!("stdout writer exited (channel closed)");
    });

    // Shutdown follows stdin EOF: dropping `incoming_tx` drains the
    // processor, which drops the outgoing sender, which ends the writer.
    drop(incoming_tx);
    drop(outgoing_tx);
    let _ = tokio::join!(stdin_reader_handle, processor_handle, stdout_writer_handle);

    Ok(())
}
