use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::{Invocation, ToolError, ToolOutcome, ToolRunner};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Shared flag raised by a termination signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs invocations as child processes, blocking until they exit.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    cancel: CancelToken,
}

impl ProcessRunner {
    /// Runner that kills its child once `cancel` is raised.
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn join_output(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

impl ProcessRunner {
    fn wait(&self, child: &mut Child, program: &str) -> Result<Option<i32>, ToolError> {
        let io_err = |source| ToolError::Io {
            program: program.to_string(),
            source,
        };
        loop {
            if let Some(status) = child.try_wait().map_err(io_err)? {
                return Ok(status.code());
            }
            if self.cancel.is_cancelled() {
                warn!(program, "terminating child after cancellation");
                if let Err(err) = child.kill() {
                    warn!(program, error = %err, "failed to kill child");
                }
                let _ = child.wait();
                return Err(ToolError::Interrupted {
                    program: program.to_string(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ToolRunner for ProcessRunner {
    fn invoke(&mut self, invocation: &Invocation) -> Result<ToolOutcome, ToolError> {
        if self.cancel.is_cancelled() {
            return Err(ToolError::Interrupted {
                program: invocation.program.clone(),
            });
        }
        debug!(command = %invocation.command_line(), "spawning");
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let exit_code = self.wait(&mut child, &invocation.program);
        let stdout = join_output(stdout);
        let stderr = join_output(stderr);
        let exit_code = exit_code?;

        Ok(ToolOutcome {
            exit_code,
            stdout,
            stderr,
            artifacts: ToolOutcome::existing_outputs(invocation),
        })
    }
}
