mod args;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::{select, signal};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

use crate::args::Args;
use slamd_core::types::job_class::{JobClassRegistry, JobRunner, NullJobClass};
use slamd_core::types::stat::encode_trackers;
use slamd_core::wire::protocol::{Envelope, HelloResultCode, JobResponseCode, MessageBody};
use slamd_core::wire::{self, Codec};

type Sink = Arc<AsyncMutex<SplitSink<Framed<TcpStream, Codec>, Envelope>>>;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let mut registry = JobClassRegistry::new();
    registry.register(Arc::new(NullJobClass));
    let registry = Arc::new(registry);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "ctrl-c handler failed");
            }
            cancel.cancel();
        });
    }

    match run(args, registry, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "client exited with error");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args, registry: Arc<JobClassRegistry>, cancel: CancellationToken) -> Result<()> {
    let stream = TcpStream::connect((args.slamd_address.as_str(), args.client_port))
        .await
        .context("connecting to server")?;
    stream.set_nodelay(true).context("setting NODELAY")?;

    let framed = wire::framed(stream);
    let (sink, mut stream) = framed.split();
    let sink: Sink = Arc::new(AsyncMutex::new(sink));

    {
        let mut s = sink.lock().await;
        s.send(Envelope::new(1, MessageBody::HelloRequest {
            auth_id: args.auth_id.clone(),
            auth_credential: args.auth_credential.clone(),
            client_id: args.client_id.clone(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
        }))
        .await
        .context("sending hello")?;
    }

    let hello = stream.next().await.context("connection closed before hello reply")?.context("decoding hello reply")?;
    match hello.body {
        MessageBody::HelloResponse { result: HelloResultCode::Success, .. } => {
            info!("handshake complete");
        },
        MessageBody::HelloResponse { result, reason } => {
            anyhow::bail!("server rejected hello: {result:?} ({reason:?})");
        },
        _ => anyhow::bail!("unexpected reply to hello"),
    }

    {
        let sink = sink.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { keepalive_loop(sink, cancel).await });
    }

    loop {
        let item = select! {
            item = stream.next() => item,
            _ = cancel.cancelled() => return shutdown(sink).await,
        };

        match item {
            Some(Ok(envelope)) => handle_envelope(envelope, &sink, &registry, &cancel),
            Some(Err(error)) => {
                warn!(%error, "decode error, disconnecting");
                return Ok(());
            },
            None => {
                debug!("server closed connection");
                return Ok(());
            },
        }
    }
}

fn handle_envelope(
    envelope: Envelope,
    sink: &Sink,
    registry: &Arc<JobClassRegistry>,
    cancel: &CancellationToken,
) {
    match envelope.body {
        MessageBody::JobRequest {
            job_id,
            class_name,
            start_time_epoch_secs,
            threads,
            duration_secs,
            parameters: _,
            ..
        } => {
            let message_id = envelope.message_id;
            let descriptor = registry.get(&class_name);
            let sink = sink.clone();
            tokio::spawn(async move {
                if let Err(error) =
                    accept_and_run(sink, message_id, job_id, descriptor, start_time_epoch_secs, threads, duration_secs)
                        .await
                {
                    warn!(%error, "job handling failed");
                }
            });
        },
        MessageBody::JobControlRequest { job_id, op } => {
            info!(%job_id, ?op, "job control received (client does not support preemption)");
        },
        MessageBody::KeepAlive => {},
        MessageBody::Shutdown | MessageBody::ServerShutdown => {
            cancel.cancel();
        },
        other => debug!(?other, "unhandled message"),
    }
}

/// Replies to the start barrier immediately (Accepted or a rejection), then
/// — if accepted — waits for the agreed start time, runs the workload, and
/// reports the outcome using the same message id. The server's pending-reply
/// table has already consumed that id for the accept, so this second send
/// routes to the server's unsolicited channel, exactly like an operator-
/// initiated stop would (§4.1, §4.4).
async fn accept_and_run(
    sink: Sink,
    message_id: i64,
    job_id: String,
    descriptor: Option<Arc<dyn slamd_core::types::job_class::JobClassDescriptor>>,
    start_time_epoch_secs: i64,
    threads: u32,
    duration_secs: Option<u32>,
) -> Result<()> {
    let Some(descriptor) = descriptor else {
        send(&sink, Envelope::new(message_id, MessageBody::JobResponse {
            job_id,
            code: JobResponseCode::RejectedNoSuchClass,
            message: Some("no such job class".to_owned()),
            statistics: None,
        }))
        .await?;
        return Ok(());
    };

    send(&sink, Envelope::new(message_id, MessageBody::JobResponse {
        job_id: job_id.clone(),
        code: JobResponseCode::Accepted,
        message: None,
        statistics: None,
    }))
    .await?;

    wait_until_epoch(start_time_epoch_secs).await;

    let mut runner = descriptor.new_runner();
    let trackers = runner.run(threads, duration_secs);
    let payload = encode_trackers(&trackers);

    send(&sink, Envelope::new(message_id, MessageBody::JobResponse {
        job_id,
        code: JobResponseCode::JobCompletedSuccessfully,
        message: None,
        statistics: Some(payload),
    }))
    .await
}

async fn wait_until_epoch(target_epoch_secs: i64) {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    if target_epoch_secs > now {
        tokio::time::sleep(Duration::from_secs((target_epoch_secs - now) as u64)).await;
    }
}

async fn send(sink: &Sink, envelope: Envelope) -> Result<()> {
    sink.lock().await.send(envelope).await.context("sending frame")
}

async fn keepalive_loop(sink: Sink, cancel: CancellationToken) {
    loop {
        select! {
            _ = tokio::time::sleep(KEEPALIVE_INTERVAL) => {
                if send(&sink, Envelope::new(0, MessageBody::KeepAlive)).await.is_err() {
                    return;
                }
            },
            _ = cancel.cancelled() => return,
        }
    }
}

async fn shutdown(sink: Sink) -> Result<()> {
    sink.lock().await.close().await.context("closing connection")
}
