// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster driver backed by the `kubectl` CLI.
//!
//! Each operation runs one `kubectl` process. Watches and followed logs keep
//! their process alive for as long as the returned channel or stream is held;
//! dropping it kills the process.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::traits::*;

const WATCH_CHANNEL_CAPACITY: usize = 16;

/// Configuration for the kubectl driver.
#[derive(Debug, Clone)]
pub struct KubectlConfig {
    /// Path to the kubectl binary.
    pub binary: String,
    /// Explicit kubeconfig; in-cluster or default config when unset.
    pub kubeconfig: Option<PathBuf>,
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
            kubeconfig: None,
        }
    }
}

/// [`ClusterDriver`] that shells out to `kubectl`.
pub struct KubectlDriver {
    config: KubectlConfig,
}

#[derive(Deserialize)]
struct JobObject {
    #[serde(default)]
    status: JobStatus,
}

#[derive(Deserialize)]
struct WatchEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: Value,
}

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodItem>,
}

#[derive(Deserialize)]
struct PodItem {
    metadata: PodMetadata,
}

#[derive(Deserialize)]
struct PodMetadata {
    name: String,
}

impl KubectlDriver {
    pub fn new(config: KubectlConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        if let Some(kubeconfig) = &self.config.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        cmd.args(args);
        cmd.kill_on_drop(true);
        cmd
    }

    fn describe(args: &[&str]) -> String {
        format!("kubectl {}", args.join(" "))
    }

    /// Run kubectl to completion and return its stdout.
    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>> {
        let mut cmd = self.command(args);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_not_found(&stderr) {
            return Err(ClusterError::NotFound(stderr));
        }
        Err(ClusterError::CommandFailed {
            command: Self::describe(args),
            stderr,
        })
    }

    /// Spawn a long-running kubectl whose stdout is consumed incrementally.
    ///
    /// Stderr is drained in the background so the process never blocks on
    /// it; the returned handle yields the collected text.
    fn spawn_streaming(&self, args: &[&str]) -> Result<StreamingProcess> {
        let mut cmd = self.command(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ClusterError::Io(io::Error::other("kubectl stdout was not captured"))
        })?;
        let stderr = collect_stderr(&mut child);
        debug!(command = %Self::describe(args), "Spawned streaming kubectl");
        Ok(StreamingProcess {
            command: Self::describe(args),
            child,
            stdout,
            stderr,
        })
    }
}

/// A spawned kubectl with its output pipes split off.
struct StreamingProcess {
    command: String,
    child: Child,
    stdout: ChildStdout,
    stderr: JoinHandle<String>,
}

impl StreamingProcess {
    /// Wait for the process after its stdout closed and turn a non-zero exit
    /// into an error carrying its stderr.
    async fn finish(command: String, mut child: Child, stderr: JoinHandle<String>) -> io::Result<()> {
        let status = child.wait().await?;
        let stderr = stderr.await.unwrap_or_default();
        match exit_error(&command, status, &stderr) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn collect_stderr(child: &mut Child) -> JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut text = String::new();
        if let Some(mut stderr) = stderr
            && let Err(e) = stderr.read_to_string(&mut text).await
        {
            debug!(error = %e, "Failed to read kubectl stderr");
        }
        text.trim().to_string()
    })
}

fn exit_error(command: &str, status: ExitStatus, stderr: &str) -> Option<io::Error> {
    if status.success() {
        return None;
    }
    Some(io::Error::other(format!(
        "`{}` failed ({}): {}",
        command, status, stderr
    )))
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("(NotFound)") || stderr.contains("not found")
}

fn since_arg(since: DateTime<Utc>) -> String {
    format!(
        "--since-time={}",
        since.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Decode every complete JSON value at the front of `buf`, leaving any
/// trailing partial value in place.
fn drain_watch_events(buf: &mut Vec<u8>) -> std::result::Result<Vec<JobEvent>, serde_json::Error> {
    let mut events = Vec::new();
    let mut consumed = 0;
    {
        let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<WatchEnvelope>();
        loop {
            match stream.next() {
                Some(Ok(envelope)) => {
                    consumed = stream.byte_offset();
                    let kind = WatchEventKind::from_wire(&envelope.kind);
                    let status = match kind {
                        WatchEventKind::Error => None,
                        _ => envelope
                            .object
                            .get("status")
                            .cloned()
                            .map(serde_json::from_value::<JobStatus>)
                            .transpose()?
                            .or(Some(JobStatus::default())),
                    };
                    events.push(JobEvent { kind, status });
                }
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
    }
    buf.drain(..consumed);
    Ok(events)
}

#[async_trait]
impl ClusterDriver for KubectlDriver {
    fn driver_type(&self) -> &'static str {
        "kubectl"
    }

    async fn submit_document(&self, verb: ResourceVerb, document: &str) -> Result<()> {
        let subcommand = match verb {
            ResourceVerb::Create => "create",
            ResourceVerb::Apply => "apply",
            ResourceVerb::Update => "replace",
            ResourceVerb::Delete => "delete",
        };
        self.run(&[subcommand, "-f", "-"], Some(document.as_bytes()))
            .await?;
        Ok(())
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        match self.run(&["get", "namespace", namespace, "-o", "name"], None).await {
            Ok(_) => Ok(true),
            Err(ClusterError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete_namespace(&self, namespace: &str, grace: Duration) -> Result<()> {
        let grace = format!("--grace-period={}", grace.as_secs());
        self.run(&["delete", "namespace", namespace, &grace, "--wait=false"], None)
            .await?;
        info!(namespace = %namespace, "Deleted namespace");
        Ok(())
    }

    async fn delete_access_binding(&self, name: &str) -> Result<()> {
        self.run(
            &["delete", "clusterrolebinding", name, "--ignore-not-found"],
            None,
        )
        .await?;
        Ok(())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<JobStatus>> {
        match self
            .run(&["get", "job", name, "-n", namespace, "-o", "json"], None)
            .await
        {
            Ok(stdout) => {
                let job: JobObject = serde_json::from_slice(&stdout)?;
                Ok(Some(job.status))
            }
            Err(ClusterError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_job(&self, namespace: &str, job: &Value) -> Result<()> {
        let manifest = serde_json::to_vec(job)?;
        self.run(&["create", "-n", namespace, "-f", "-"], Some(&manifest))
            .await?;
        Ok(())
    }

    async fn watch_job(&self, namespace: &str, name: &str) -> Result<mpsc::Receiver<JobEvent>> {
        let selector = format!("metadata.name={}", name);
        let StreamingProcess {
            command,
            mut child,
            mut stdout,
            stderr,
        } = self.spawn_streaming(&[
            "get",
            "job",
            "-n",
            namespace,
            "--field-selector",
            &selector,
            "--watch",
            "--output-watch-events",
            "-o",
            "json",
        ])?;

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let namespace = namespace.to_string();
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 8192];
            let mut exited = false;
            loop {
                let read = match stdout.read(&mut chunk).await {
                    Ok(0) => {
                        exited = true;
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!(namespace = %namespace, error = %e, "Job watch read failed");
                        break;
                    }
                };
                buf.extend_from_slice(&chunk[..read]);

                let events = match drain_watch_events(&mut buf) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(namespace = %namespace, error = %e, "Undecodable job watch output");
                        break;
                    }
                };
                for event in events {
                    if tx.send(event).await.is_err() {
                        // Receiver dropped, watch no longer needed.
                        let _ = child.kill().await;
                        return;
                    }
                }
            }
            if !exited {
                let _ = child.kill().await;
                debug!(namespace = %namespace, "Job watch ended");
                return;
            }
            match StreamingProcess::finish(command, child, stderr).await {
                Ok(()) => debug!(namespace = %namespace, "Job watch ended"),
                Err(e) => warn!(namespace = %namespace, error = %e, "Job watch failed"),
            }
        });

        Ok(rx)
    }

    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<String>> {
        let selector = format!("job-name={}", job_name);
        let stdout = self
            .run(
                &["get", "pods", "-n", namespace, "-l", &selector, "-o", "json"],
                None,
            )
            .await?;
        let pods: PodList = serde_json::from_slice(&stdout)?;
        Ok(pods.items.into_iter().map(|p| p.metadata.name).collect())
    }

    async fn stream_pod_log(
        &self,
        namespace: &str,
        pod: &str,
        follow: bool,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogStream> {
        let mut args = vec!["logs", pod, "-n", namespace];
        if follow {
            args.push("--follow");
        }
        let since = since.map(since_arg);
        if let Some(since) = &since {
            args.push(since);
        }

        let process = self.spawn_streaming(&args)?;
        Ok(Box::new(ProcessStream::new(process)))
    }
}

type ExitFuture = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// Stdout of a running process; the process is killed when this is dropped.
///
/// End of output is only reported once the process has exited cleanly. A
/// non-zero exit surfaces as a read error carrying the process's stderr.
struct ProcessStream {
    stdout: BufReader<ChildStdout>,
    exit: Option<ExitFuture>,
}

impl ProcessStream {
    fn new(process: StreamingProcess) -> Self {
        let StreamingProcess {
            command,
            child,
            stdout,
            stderr,
        } = process;
        Self {
            stdout: BufReader::new(stdout),
            exit: Some(Box::pin(StreamingProcess::finish(command, child, stderr))),
        }
    }
}

impl AsyncRead for ProcessStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let available = ready!(Pin::new(&mut *this).poll_fill_buf(cx))?;
        let n = available.len().min(buf.remaining());
        buf.put_slice(&available[..n]);
        Pin::new(this).consume(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncBufRead for ProcessStream {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        let eof = ready!(Pin::new(&mut this.stdout).poll_fill_buf(cx))?.is_empty();
        if eof && let Some(exit) = this.exit.as_mut() {
            let result = ready!(exit.as_mut().poll(cx));
            this.exit = None;
            result?;
        }
        Pin::new(&mut this.stdout).poll_fill_buf(cx)
    }

    fn consume(mut self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.stdout).consume(amt)
    }
}
