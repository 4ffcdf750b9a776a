//! Dedicated bridge thread

use crate::env::Environment;
use crate::lifecycle::Bridge;
use ember_core::{Error, RequestDescriptor, Result};
use ember_scripting::Interpreter;
use std::path::PathBuf;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

/// Default depth of the job queue
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Work item executed on the bridge thread
#[derive(Debug)]
enum Job {
    Request {
        headers: Vec<(String, String)>,
        request: RequestDescriptor,
        script: PathBuf,
        reply: oneshot::Sender<Vec<u8>>,
    },
    Command {
        command_line: String,
        app_public_path: PathBuf,
        reply: oneshot::Sender<Vec<u8>>,
    },
    SetEnv {
        name: String,
        value: String,
        overwrite: bool,
        reply: oneshot::Sender<i32>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    Stop,
}

/// Owns the thread a [`Bridge`] runs on
#[derive(Debug)]
pub struct BridgeWorker {
    handle: BridgeHandle,
    thread: Option<JoinHandle<()>>,
}

impl BridgeWorker {
    /// Move `bridge` onto a new thread serving jobs from a queue of
    /// `queue_depth`
    pub fn spawn<I, E>(bridge: Bridge<I, E>, queue_depth: usize) -> Result<Self>
    where
        I: Interpreter + 'static,
        E: Environment + 'static,
    {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));

        let thread = std::thread::Builder::new()
            .name("ember-bridge".to_string())
            .spawn(move || serve_jobs(bridge, receiver))
            .map_err(|e| Error::Runtime(format!("Failed to spawn bridge thread: {e}")))?;

        info!(queue_depth, "Bridge worker started");

        Ok(Self {
            handle: BridgeHandle { sender },
            thread: Some(thread),
        })
    }

    /// A handle for submitting jobs
    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    /// Stop the worker after queued jobs and wait for the thread to exit
    pub async fn join(mut self) -> Result<()> {
        // The thread may already be gone; joining reports how it ended
        let _ = self.handle.sender.send(Job::Stop).await;

        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|e| Error::Runtime(format!("Failed to join bridge thread: {e}")))?
            .map_err(|_| Error::Runtime("Bridge thread panicked".to_string()))
    }
}

fn serve_jobs<I, E>(mut bridge: Bridge<I, E>, mut receiver: mpsc::Receiver<Job>)
where
    I: Interpreter,
    E: Environment,
{
    while let Some(job) = receiver.blocking_recv() {
        match job {
            Job::Request {
                headers,
                request,
                script,
                reply,
            } => {
                trace!(method = %request.method, uri = %request.uri, "Request job");
                bridge.export_request_headers(
                    headers.iter().map(|(name, value)| (name.as_str(), value.as_str())),
                );
                let _ = reply.send(bridge.run_once(&request, &script));
            }
            Job::Command {
                command_line,
                app_public_path,
                reply,
            } => {
                trace!(command = %command_line, "Command job");
                let _ = reply.send(bridge.run_command(&command_line, &app_public_path));
            }
            Job::SetEnv {
                name,
                value,
                overwrite,
                reply,
            } => {
                let _ = reply.send(bridge.set_environment_variable(&name, &value, overwrite));
            }
            Job::Shutdown { reply } => {
                bridge.shutdown();
                let _ = reply.send(());
            }
            Job::Stop => break,
        }
    }

    bridge.shutdown();
    debug!("Bridge worker exiting");
}

/// Cloneable async façade over a [`BridgeWorker`]
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    sender: mpsc::Sender<Job>,
}

impl BridgeHandle {
    async fn submit<T>(&self, job: Job, reply: oneshot::Receiver<T>) -> Result<T> {
        self.sender
            .send(job)
            .await
            .map_err(|_| Error::Runtime("bridge worker stopped".to_string()))?;
        reply
            .await
            .map_err(|_| Error::Runtime("bridge worker dropped the reply".to_string()))
    }

    /// Export `headers`, then run `script` for `request` and return the
    /// composed response
    pub async fn run_once(
        &self,
        request: RequestDescriptor,
        script: impl Into<PathBuf>,
        headers: Vec<(String, String)>,
    ) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        let job = Job::Request {
            headers,
            request,
            script: script.into(),
            reply,
        };
        self.submit(job, rx).await
    }

    /// Run a console command and return its raw output
    pub async fn run_command(
        &self,
        command_line: impl Into<String>,
        app_public_path: impl Into<PathBuf>,
    ) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        let job = Job::Command {
            command_line: command_line.into(),
            app_public_path: app_public_path.into(),
            reply,
        };
        self.submit(job, rx).await
    }

    /// Set an environment variable on the bridge thread's environment
    pub async fn set_environment_variable(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
        overwrite: bool,
    ) -> Result<i32> {
        let (reply, rx) = oneshot::channel();
        let job = Job::SetEnv {
            name: name.into(),
            value: value.into(),
            overwrite,
            reply,
        };
        self.submit(job, rx).await
    }

    /// Shut the interpreter down; the next request warms it again
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Shutdown { reply }, rx).await
    }
}
