//! Executes one tool call against the session registry and shapes the
//! outcome as a `CallToolResult`. Engine errors become structured JSON
//! payloads with a stable code and an optional suggestion; they are tool
//! results with `is_error`, never JSON-RPC transport errors.

use std::sync::Arc;

use mcp_types::CallToolResult;
use mcp_types::CallToolResultContent;
use mcp_types::TextContent;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use anneal_core::EngineError;
use anneal_core::SessionRegistry;
use anneal_core::engine::SessionEngine;
use anneal_core::exec::CommandRunner;
use anneal_core::fs::Fs;

use crate::tool_config::GetFileContentToolParam;
use crate::tool_config::GetFileLinesToolParam;
use crate::tool_config::RestoreCheckpointToolParam;
use crate::tool_config::SaveCheckpointToolParam;
use crate::tool_config::SessionOnlyToolParam;
use crate::tool_config::StartSessionToolParam;
use crate::tool_config::SubmitCandidateToolParam;
use crate::tool_config::ValidateCandidateToolParam;

pub(crate) async fn handle_tool_call(
    registry: Arc<SessionRegistry>,
    fs: Arc<dyn Fs>,
    name: String,
    arguments: Option<Value>,
) -> CallToolResult {
    match name.as_str() {
        "start_session" => {
            let param: StartSessionToolParam = match parse_args(arguments) {
                Ok(param) => param,
                Err(result) => return result,
            };
            match SessionEngine::start(param.into(), fs, CommandRunner::Process).await {
                Ok(engine) => {
                    let session_id = registry.insert(engine).await;
                    success(&json!({ "sessionId": session_id }))
                }
                Err(err) => failure(&err),
            }
        }
        "submit_candidate" => {
            let SubmitCandidateToolParam {
                session_id,
                candidate,
                rationale,
            } = match parse_args(arguments) {
                Ok(param) => param,
                Err(result) => return result,
            };
            with_session(&registry, &session_id, |engine| async move {
                let mut engine = engine.lock().await;
                engine
                    .submit(candidate.into(), rationale)
                    .await
                    .map(|outcome| to_result(&outcome))
            })
            .await
        }
        "validate_candidate" => {
            let ValidateCandidateToolParam {
                session_id,
                candidate,
            } = match parse_args(arguments) {
                Ok(param) => param,
                Err(result) => return result,
            };
            with_session(&registry, &session_id, |engine| async move {
                let engine = engine.lock().await;
                Ok(to_result(&engine.validate(&candidate.into())))
            })
            .await
        }
        "get_file_content" => {
            let GetFileContentToolParam { session_id, paths } = match parse_args(arguments) {
                Ok(param) => param,
                Err(result) => return result,
            };
            with_session(&registry, &session_id, |engine| async move {
                let mut engine = engine.lock().await;
                engine
                    .get_file_content(&paths)
                    .map(|files| to_result(&json!({ "files": files })))
            })
            .await
        }
        "get_file_lines" => {
            let GetFileLinesToolParam {
                session_id,
                file,
                start_line,
                end_line,
            } = match parse_args(arguments) {
                Ok(param) => param,
                Err(result) => return result,
            };
            with_session(&registry, &session_id, |engine| async move {
                let engine = engine.lock().await;
                engine
                    .get_file_lines(&file, start_line, end_line)
                    .map(|lines| to_result(&lines))
            })
            .await
        }
        "get_state" => {
            session_only(registry, arguments, |engine| async move {
                let engine = engine.lock().await;
                Ok(to_result(&engine.get_state()))
            })
            .await
        }
        "should_halt" => {
            session_only(registry, arguments, |engine| async move {
                let engine = engine.lock().await;
                Ok(to_result(&engine.should_halt()))
            })
            .await
        }
        "get_suggestions" => {
            session_only(registry, arguments, |engine| async move {
                let engine = engine.lock().await;
                Ok(to_result(&json!({ "suggestions": engine.get_suggestions() })))
            })
            .await
        }
        "save_checkpoint" => {
            let SaveCheckpointToolParam {
                session_id,
                description,
            } = match parse_args(arguments) {
                Ok(param) => param,
                Err(result) => return result,
            };
            with_session(&registry, &session_id, |engine| async move {
                let mut engine = engine.lock().await;
                engine
                    .save_checkpoint(description)
                    .map(|summary| to_result(&summary))
            })
            .await
        }
        "restore_checkpoint" => {
            let RestoreCheckpointToolParam {
                session_id,
                checkpoint_id,
            } = match parse_args(arguments) {
                Ok(param) => param,
                Err(result) => return result,
            };
            with_session(&registry, &session_id, |engine| async move {
                let mut engine = engine.lock().await;
                engine
                    .restore_checkpoint(&checkpoint_id)
                    .map(|summary| to_result(&summary))
            })
            .await
        }
        "list_checkpoints" => {
            session_only(registry, arguments, |engine| async move {
                let engine = engine.lock().await;
                Ok(to_result(&json!({ "checkpoints": engine.list_checkpoints() })))
            })
            .await
        }
        "reset_to_baseline" => {
            session_only(registry, arguments, |engine| async move {
                let mut engine = engine.lock().await;
                engine.reset_to_baseline().await.map(|state| to_result(&state))
            })
            .await
        }
        "undo_last_candidate" => {
            session_only(registry, arguments, |engine| async move {
                let mut engine = engine.lock().await;
                engine.undo_last().map(|report| to_result(&report))
            })
            .await
        }
        "suggest_fix" => {
            session_only(registry, arguments, |engine| async move {
                let engine = engine.lock().await;
                Ok(to_result(&engine.suggest_fix()))
            })
            .await
        }
        "end_session" => {
            let param: SessionOnlyToolParam = match parse_args(arguments) {
                Ok(param) => param,
                Err(result) => return result,
            };
            let id = match parse_session_id(&param.session_id) {
                Ok(id) => id,
                Err(result) => return result,
            };
            match registry.remove(id).await {
                Ok(()) => success(&json!({ "sessionId": id, "ended": true })),
                Err(err) => failure(&err),
            }
        }
        other => text_error(format!("Unknown tool '{other}'")),
    }
}

async fn session_only<F, Fut>(
    registry: Arc<SessionRegistry>,
    arguments: Option<Value>,
    op: F,
) -> CallToolResult
where
    F: FnOnce(Arc<tokio::sync::Mutex<SessionEngine>>) -> Fut,
    Fut: Future<Output = Result<CallToolResult, EngineError>>,
{
    let param: SessionOnlyToolParam = match parse_args(arguments) {
        Ok(param) => param,
        Err(result) => return result,
    };
    with_session(&registry, &param.session_id, op).await
}

async fn with_session<F, Fut>(
    registry: &Arc<SessionRegistry>,
    session_id: &str,
    op: F,
) -> CallToolResult
where
    F: FnOnce(Arc<tokio::sync::Mutex<SessionEngine>>) -> Fut,
    Fut: Future<Output = Result<CallToolResult, EngineError>>,
{
    let id = match parse_session_id(session_id) {
        Ok(id) => id,
        Err(result) => return result,
    };
    let handle = match registry.get(id).await {
        Ok(handle) => handle,
        Err(err) => return failure(&err),
    };
    match op(handle).await {
        Ok(result) => result,
        Err(err) => failure(&err),
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Option<Value>) -> Result<T, CallToolResult> {
    let Some(value) = arguments else {
        return Err(text_error(
            "Missing arguments for tool call".to_string(),
        ));
    };
    serde_json::from_value(value)
        .map_err(|e| text_error(format!("Failed to parse tool arguments: {e}")))
}

fn parse_session_id(raw: &str) -> Result<Uuid, CallToolResult> {
    Uuid::parse_str(raw).map_err(|_| {
        failure(&EngineError::InvalidParameter {
            name: "sessionId".to_string(),
            reason: format!("{raw:?} is not a valid session id"),
        })
    })
}

fn to_result<T: Serialize>(value: &T) -> CallToolResult {
    success(value)
}

fn success<T: Serialize>(value: &T) -> CallToolResult {
    let text = match serde_json::to_string_pretty(value) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to serialize tool result: {e}");
            return text_error("Internal error serializing tool result".to_string());
        }
    };
    CallToolResult {
        content: vec![CallToolResultContent::TextContent(TextContent::new(text))],
        is_error: None,
    }
}

fn failure(err: &EngineError) -> CallToolResult {
    let body = json!({
        "code": err.code(),
        "message": err.to_string(),
        "suggestion": err.suggestion(),
    });
    let text = body.to_string();
    CallToolResult {
        content: vec![CallToolResultContent::TextContent(TextContent::new(text))],
        is_error: Some(true),
    }
}

fn text_error(text: String) -> CallToolResult {
    CallToolResult {
        content: vec![CallToolResultContent::TextContent(TextContent::new(text))],
        is_error: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let registry = Arc::new(SessionRegistry::new());
        let fs: Arc<dyn Fs> = Arc::new(anneal_core::fs::RealFs);
        let result = handle_tool_call(registry, fs, "no_such_tool".to_string(), None).await;
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn unknown_session_fails_before_any_work() {
        let registry = Arc::new(SessionRegistry::new());
        let fs: Arc<dyn Fs> = Arc::new(anneal_core::fs::RealFs);
        let result = handle_tool_call(
            registry,
            fs,
            "get_state".to_string(),
            Some(json!({ "sessionId": Uuid::new_v4().to_string() })),
        )
        .await;
        assert_eq!(result.is_error, Some(true));
        let CallToolResultContent::TextContent(content) = &result.content[0];
        assert!(content.text.contains("UnknownSession"));
    }

    #[tokio::test]
    async fn start_and_end_session_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(SessionRegistry::new());
        let fs: Arc<dyn Fs> = Arc::new(anneal_core::fs::RealFs);

        let result = handle_tool_call(
            registry.clone(),
            fs.clone(),
            "start_session".to_string(),
            Some(json!({ "repoPath": dir.path().to_string_lossy() })),
        )
        .await;
        assert_eq!(result.is_error, None);
        let CallToolResultContent::TextContent(content) = &result.content[0];
        let body: Value = serde_json::from_str(&content.text).expect("json body");
        let session_id = body["sessionId"].as_str().expect("session id").to_string();

        let result = handle_tool_call(
            registry.clone(),
            fs.clone(),
            "end_session".to_string(),
            Some(json!({ "sessionId": session_id })),
        )
        .await;
        assert_eq!(result.is_error, None);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn malformed_session_id_is_invalid_parameter() {
        let registry = Arc::new(SessionRegistry::new());
        let fs: Arc<dyn Fs> = Arc::new(anneal_core::fs::RealFs);
        let result = handle_tool_call(
            registry,
            fs,
            "get_state".to_string(),
            Some(json!({ "sessionId": "not-a-uuid" })),
        )
        .await;
        assert_eq!(result.is_error, Some(true));
        let CallToolResultContent::TextContent(content) = &result.content[0];
        assert!(content.text.contains("InvalidParameter"));
    }
}
