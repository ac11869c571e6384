//! Command execution inside database containers.

use std::io::{Read, Write};
use std::path::Path;

use crate::error::Result;

pub mod docker;

#[cfg(test)]
pub(crate) mod testing;

pub use docker::DockerCli;

/// A command to run inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub container: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ExecRequest {
    pub fn new<I, S>(container: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            container: container.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }
}

/// Exit status and captured text of a finished command. `stdout` is empty
/// for streamed executions, whose output went to the caller's writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, for scanning and error messages.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// Container runtime operations the snapshot engines rely on.
pub trait ContainerExec: Send + Sync {
    fn is_running(&self, container: &str) -> Result<bool>;

    /// Run a command to completion, capturing stdout and stderr.
    fn exec(&self, req: &ExecRequest) -> Result<ExecOutput>;

    /// Run a command feeding `stdin` (if any) to it while copying its stdout
    /// into `stdout`. Both directions are joined before returning and a
    /// failure on either side is reported.
    fn exec_stream(
        &self,
        req: &ExecRequest,
        stdin: Option<&mut (dyn Read + Send)>,
        stdout: &mut (dyn Write + Send),
    ) -> Result<ExecOutput>;

    fn stop(&self, container: &str) -> Result<()>;

    fn start(&self, container: &str) -> Result<()>;

    /// Copy a host file to `container_path`; works on stopped containers.
    fn copy_into(&self, container: &str, host_path: &Path, container_path: &str) -> Result<()>;
}
