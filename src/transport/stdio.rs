//! Line based consumer and producer over async readers and writers

use super::{Consumer, MessageSink, Producer};
use crate::core::{
    codec::{JsonMessageEncoder, MessageEncoder},
    config::OutputFormat,
    error::{CoreError, CoreResult},
    lifecycle::{Lifecycle, LifecycleManager},
    message::Message,
};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reader state handed back on stop: input, sink and any line read but not yet delivered
type Parked<R> = (Lines<BufReader<R>>, MessageSink, Option<String>);

/// Delivers one message per non-blank input line
///
/// Reading happens on a spawned task between `start` and `stop`. Once the
/// input is exhausted the consumer releases its sink, so the workflow sees
/// its inbox close.
pub struct LineConsumer<R> {
    lifecycle: LifecycleManager,
    parked: Mutex<Option<Lines<BufReader<R>>>>,
    sink: Option<MessageSink>,
    pending: Option<String>,
    shutdown: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<Option<Parked<R>>>>,
}

/// Consumer reading standard input
pub type StdinConsumer = LineConsumer<Stdin>;

impl StdinConsumer {
    pub fn stdin() -> Self {
        LineConsumer::new("stdin-consumer", tokio::io::stdin())
    }
}

impl<R> LineConsumer<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(name: impl Into<String>, input: R) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            parked: Mutex::new(Some(BufReader::new(input).lines())),
            sink: None,
            pending: None,
            shutdown: None,
            reader: None,
        }
    }
}

/// Next non-blank line; None at end of input or on a read error
async fn next_input<R>(name: &str, lines: &mut Lines<BufReader<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => return Some(line),
            Ok(None) => {
                info!(component = %name, "end of input");
                return None;
            }
            Err(e) => {
                warn!(component = %name, error = %e, "failed to read input");
                return None;
            }
        }
    }
}

#[async_trait]
impl<R> Lifecycle for LineConsumer<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }

    async fn on_start(&mut self) -> CoreResult<()> {
        let name = self.lifecycle.name().to_string();
        let (mut lines, sink) = match (self.parked.get_mut().take(), self.sink.take()) {
            (Some(lines), Some(sink)) => (lines, sink),
            (None, _) => {
                debug!(component = %name, "input already exhausted");
                return Ok(());
            }
            (Some(_), None) => {
                return Err(CoreError::configuration(name, "consumer was never registered with a workflow"));
            }
        };
        let mut pending = self.pending.take();

        // Shutdown only interrupts a read or a send that has not happened yet;
        // a line already read stays pending across a stop.
        let (tx, mut rx) = oneshot::channel();
        self.shutdown = Some(tx);
        self.reader = Some(tokio::spawn(async move {
            loop {
                let line = match pending.take() {
                    Some(line) => line,
                    None => tokio::select! {
                        _ = &mut rx => return Some((lines, sink, None)),
                        line = next_input(&name, &mut lines) => match line {
                            Some(line) => line,
                            None => return None,
                        },
                    },
                };
                tokio::select! {
                    _ = &mut rx => return Some((lines, sink, Some(line))),
                    sent = sink.deliver(Message::new(line.clone())) => {
                        if let Err(e) = sent {
                            warn!(component = %name, error = %e, "dropping input, workflow gone");
                            return None;
                        }
                    }
                }
            }
        }));
        Ok(())
    }

    async fn on_stop(&mut self) -> CoreResult<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(reader) = self.reader.take() {
            match reader.await {
                Ok(Some((lines, sink, pending))) => {
                    *self.parked.get_mut() = Some(lines);
                    self.sink = Some(sink);
                    self.pending = pending;
                }
                Ok(None) => {}
                Err(e) => return Err(CoreError::processing(self.lifecycle.name(), e)),
            }
        }
        Ok(())
    }
}

impl<R> Consumer for LineConsumer<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn register(&mut self, sink: MessageSink) {
        self.sink = Some(sink);
    }
}

/// Writes each produced message as one line
pub struct LineProducer<W> {
    lifecycle: LifecycleManager,
    format: OutputFormat,
    output: Mutex<W>,
    written: u64,
}

/// Producer writing to standard output
pub type StdoutProducer = LineProducer<Stdout>;

impl StdoutProducer {
    pub fn stdout(format: OutputFormat) -> Self {
        LineProducer::new("stdout-producer", tokio::io::stdout(), format)
    }
}

impl<W> LineProducer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(name: impl Into<String>, output: W, format: OutputFormat) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            format,
            output: Mutex::new(output),
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.output.into_inner()
    }

    fn render(&self, msg: &Message) -> CoreResult<Vec<u8>> {
        let mut line = match self.format {
            OutputFormat::Payload => msg.payload().to_vec(),
            OutputFormat::Json => JsonMessageEncoder.encode(msg)?,
        };
        line.push(b'\n');
        Ok(line)
    }
}

#[async_trait]
impl<W> Lifecycle for LineProducer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }

    async fn on_stop(&mut self) -> CoreResult<()> {
        self.output
            .get_mut()
            .flush()
            .await
            .map_err(|e| CoreError::processing(self.lifecycle.name(), e))
    }
}

#[async_trait]
impl<W> Producer for LineProducer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn produce(&mut self, msg: &Message) -> CoreResult<()> {
        let line = self.render(msg)?;
        let name = self.lifecycle.name().to_string();
        let output = self.output.get_mut();
        output
            .write_all(&line)
            .await
            .map_err(|e| CoreError::processing(&name, e))?;
        output.flush().await.map_err(|e| CoreError::processing(&name, e))?;
        self.written += 1;
        debug!(component = %name, message_id = %msg.unique_id(), "message written");
        Ok(())
    }
}
