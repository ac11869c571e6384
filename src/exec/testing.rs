//! Scripted [`ContainerExec`] for engine and service tests.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{ContainerExec, ExecOutput, ExecRequest};
use crate::error::{Result, SnapshotError};

/// What the fake returns for one command.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl Reply {
    pub fn ok(stdout: impl AsRef<[u8]>) -> Self {
        Self {
            stdout: stdout.as_ref().to_vec(),
            ..Default::default()
        }
    }

    pub fn fail(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stderr: stderr.to_string(),
            ..Default::default()
        }
    }
}

/// One recorded interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Exec { args: Vec<String>, stdin: Option<Vec<u8>> },
    Stop(String),
    Start(String),
    CopyInto {
        container: String,
        host: PathBuf,
        path: String,
        data: Vec<u8>,
    },
}

type Handler = Box<dyn Fn(&ExecRequest) -> Reply + Send + Sync>;

pub struct FakeExec {
    handler: Handler,
    running: Mutex<HashMap<String, bool>>,
    events: Mutex<Vec<Event>>,
}

impl FakeExec {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ExecRequest) -> Reply + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            running: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn with_running(self, container: &str) -> Self {
        self.running.lock().unwrap().insert(container.to_string(), true);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// stdin bytes passed to the first command whose program is `program`.
    pub fn stdin_of(&self, program: &str) -> Option<Vec<u8>> {
        self.events().into_iter().find_map(|e| match e {
            Event::Exec { args, stdin } if args.first().map(String::as_str) == Some(program) => stdin,
            _ => None,
        })
    }

    pub fn ran(&self, program: &str) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, Event::Exec { args, .. } if args.first().map(String::as_str) == Some(program)))
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl ContainerExec for FakeExec {
    fn is_running(&self, container: &str) -> Result<bool> {
        Ok(*self.running.lock().unwrap().get(container).unwrap_or(&false))
    }

    fn exec(&self, req: &ExecRequest) -> Result<ExecOutput> {
        self.record(Event::Exec {
            args: req.args.clone(),
            stdin: None,
        });
        let reply = (self.handler)(req);
        Ok(ExecOutput {
            exit_code: reply.exit_code,
            stdout: String::from_utf8_lossy(&reply.stdout).into_owned(),
            stderr: reply.stderr,
        })
    }

    fn exec_stream(
        &self,
        req: &ExecRequest,
        stdin: Option<&mut (dyn Read + Send)>,
        stdout: &mut (dyn Write + Send),
    ) -> Result<ExecOutput> {
        let input = match stdin {
            Some(r) => {
                let mut buf = Vec::new();
                r.read_to_end(&mut buf)
                    .map_err(|e| SnapshotError::stream("fake stdin", e))?;
                Some(buf)
            }
            None => None,
        };
        self.record(Event::Exec {
            args: req.args.clone(),
            stdin: input,
        });
        let reply = (self.handler)(req);
        stdout
            .write_all(&reply.stdout)
            .map_err(|e| SnapshotError::stream("fake stdout", e))?;
        Ok(ExecOutput {
            exit_code: reply.exit_code,
            stdout: String::new(),
            stderr: reply.stderr,
        })
    }

    fn stop(&self, container: &str) -> Result<()> {
        self.running.lock().unwrap().insert(container.to_string(), false);
        self.record(Event::Stop(container.to_string()));
        Ok(())
    }

    fn start(&self, container: &str) -> Result<()> {
        self.running.lock().unwrap().insert(container.to_string(), true);
        self.record(Event::Start(container.to_string()));
        Ok(())
    }

    fn copy_into(&self, container: &str, host_path: &Path, container_path: &str) -> Result<()> {
        let data = std::fs::read(host_path)?;
        self.record(Event::CopyInto {
            container: container.to_string(),
            host: host_path.to_path_buf(),
            path: container_path.to_string(),
            data,
        });
        Ok(())
    }
}
