use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;

use super::{ContainerExec, ExecOutput, ExecRequest};
use crate::error::{Result, SnapshotError};

/// [`ContainerExec`] backed by the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    fn exec_args(req: &ExecRequest, interactive: bool) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if interactive {
            args.push("-i".to_string());
        }
        for (k, v) in &req.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", k, v));
        }
        args.push(req.container.clone());
        args.extend(req.args.iter().cloned());
        args
    }

    fn run(&self, args: &[String]) -> Result<ExecOutput> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| SnapshotError::stream(format!("spawning {}", self.binary), e))?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Spawn the client with `args`, pumping `stdin` in on one thread and
    /// stderr out on another while this thread copies stdout.
    fn stream(
        &self,
        args: &[String],
        stdin: Option<&mut (dyn Read + Send)>,
        stdout: &mut (dyn Write + Send),
    ) -> Result<ExecOutput> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SnapshotError::stream(format!("spawning {}", self.binary), e))?;

        let child_stdin = child.stdin.take();
        let mut child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| SnapshotError::stream("command stdout", io::ErrorKind::BrokenPipe.into()))?;
        let mut child_stderr = child
            .stderr
            .take()
            .ok_or_else(|| SnapshotError::stream("command stderr", io::ErrorKind::BrokenPipe.into()))?;

        let (fed, stderr, copied) = thread::scope(|s| {
            let feeder = s.spawn(move || -> io::Result<u64> {
                match (stdin, child_stdin) {
                    // Dropping the pipe at the end signals EOF to the command.
                    (Some(src), Some(mut dst)) => io::copy(src, &mut dst),
                    _ => Ok(0),
                }
            });
            let errors = s.spawn(move || -> io::Result<String> {
                let mut buf = Vec::new();
                child_stderr.read_to_end(&mut buf)?;
                Ok(String::from_utf8_lossy(&buf).into_owned())
            });

            let copied = io::copy(&mut child_stdout, stdout);
            if copied.is_err() {
                // Unblock the feeder and the command before joining.
                let _ = child.kill();
            }
            drop(child_stdout);
            (join(feeder), join(errors), copied)
        });

        let status = child
            .wait()
            .map_err(|e| SnapshotError::stream("waiting for command", e))?;
        let exit_code = status.code().unwrap_or(-1);

        copied.map_err(|e| SnapshotError::stream("reading command output", e))?;
        let stderr = stderr.map_err(|e| SnapshotError::stream("reading command errors", e))?;
        if let Err(e) = fed {
            // A command that exits early closes its stdin; its exit code tells the story.
            if e.kind() != io::ErrorKind::BrokenPipe || exit_code == 0 {
                return Err(SnapshotError::stream("writing command input", e));
            }
        }

        Ok(ExecOutput {
            exit_code,
            stdout: String::new(),
            stderr,
        })
    }

    fn run_checked(&self, context: &str, args: &[String]) -> Result<ExecOutput> {
        let out = self.run(args)?;
        if !out.success() {
            return Err(SnapshotError::command(context, out.exit_code, out.combined()));
        }
        Ok(out)
    }
}

impl ContainerExec for DockerCli {
    fn is_running(&self, container: &str) -> Result<bool> {
        let out = self.run(&[
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.Running}}".to_string(),
            container.to_string(),
        ])?;
        Ok(out.success() && out.stdout.trim() == "true")
    }

    fn exec(&self, req: &ExecRequest) -> Result<ExecOutput> {
        debug!(container = %req.container, program = req.program(), "exec");
        self.run(&Self::exec_args(req, false))
    }

    fn exec_stream(
        &self,
        req: &ExecRequest,
        stdin: Option<&mut (dyn Read + Send)>,
        stdout: &mut (dyn Write + Send),
    ) -> Result<ExecOutput> {
        debug!(container = %req.container, program = req.program(), stdin = stdin.is_some(), "exec (streaming)");
        let args = Self::exec_args(req, stdin.is_some());
        self.stream(&args, stdin, stdout)
    }

    fn stop(&self, container: &str) -> Result<()> {
        debug!(container, "stop");
        self.run_checked(
            &format!("stopping {}", container),
            &["stop".to_string(), container.to_string()],
        )
        .map(|_| ())
    }

    fn start(&self, container: &str) -> Result<()> {
        debug!(container, "start");
        self.run_checked(
            &format!("starting {}", container),
            &["start".to_string(), container.to_string()],
        )
        .map(|_| ())
    }

    fn copy_into(&self, container: &str, host_path: &Path, container_path: &str) -> Result<()> {
        debug!(container, container_path, "copy into container");
        self.run_checked(
            &format!("copying into {}", container),
            &[
                "cp".to_string(),
                host_path.display().to_string(),
                format!("{}:{}", container, container_path),
            ],
        )
        .map(|_| ())
    }
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, io::Result<T>>) -> io::Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("stream worker panicked")))
}
