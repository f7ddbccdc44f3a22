// ABOUTME: postStart lifecycle hook, the single point this crate narrows the teacher's
// ABOUTME: pre-deploy/post-deploy/on-error hook set down to. Always non-fatal.

use std::process::Stdio;

use tokio::process::Command;

use crate::project::PostStartHook;

use super::progress::{ProgressEvent, ProgressSink, ProgressStatus};

/// Outcome of running a `postStart` hook.
#[derive(Debug)]
pub struct HookResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

/// Run a service's `postStart` command, if declared, after a freshly created
/// or recreated container has started. Failure is logged as a warning and
/// never fails the reconcile (`HookPoint::is_fatal() == false` for every
/// point but pre-deploy in the teacher, and this crate has only one point).
pub async fn run_post_start(
    hook: &PostStartHook,
    container_name: &str,
    progress: &dyn ProgressSink,
) -> Option<HookResult> {
    let Some((program, args)) = hook.command.split_first() else {
        return None;
    };

    let id = format!("Container {container_name}");
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) => {
            let result = HookResult {
                success: output.status.success(),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            };
            if !result.success {
                tracing::warn!(container = %container_name, exit_code = ?result.exit_code, "postStart hook failed");
                progress.emit(
                    ProgressEvent::new(&id, ProgressStatus::Warning)
                        .with_message(format!("postStart hook failed: {}", result.stderr)),
                );
            }
            Some(result)
        }
        Err(e) => {
            tracing::warn!(container = %container_name, error = %e, "postStart hook failed to spawn");
            progress.emit(
                ProgressEvent::new(&id, ProgressStatus::Warning)
                    .with_message(format!("postStart hook failed to spawn: {e}")),
            );
            Some(HookResult {
                success: false,
                exit_code: None,
                stderr: e.to_string(),
            })
        }
    }
}
