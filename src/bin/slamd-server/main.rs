mod args;

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Level};

use crate::args::Args;
use slamd_core::config::ServerConfig;
use slamd_core::connection::Endpoint;
use slamd_core::server::Server;
use slamd_core::store::InMemoryJobStore;
use slamd_core::types::client::{Client, MonitorClient};
use slamd_core::types::job_class::{JobClassRegistry, NullJobClass};
use slamd_core::wire::protocol::{Envelope, HelloResultCode, MessageBody};
use slamd_core::wire::{self};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let mut config = ServerConfig::default();
    config.listen_address = args.listen;
    config.client_port = args.client_port;
    config.monitor_port = args.monitor_port;
    if let Some(path) = &args.config {
        match fs::read_to_string(path).context("reading config file") {
            Ok(text) => match ServerConfig::from_yaml(&text) {
                Ok(loaded) => config = loaded,
                Err(error) => {
                    error!(%error, "invalid configuration file");
                    return ExitCode::from(2);
                },
            },
            Err(error) => {
                error!(%error, "could not read configuration file");
                return ExitCode::from(2);
            },
        }
    }

    let mut classes = JobClassRegistry::new();
    classes.register(Arc::new(NullJobClass));

    let server: Arc<Server<TcpStream>> =
        Arc::new(Server::new(config.clone(), classes, Arc::new(InMemoryJobStore::new())));

    let cancel = server.shutdown.clone();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "ctrl-c handler failed");
            }
            cancel.cancel();
        });
    }

    let client_listener = match TcpListener::bind((config.listen_address, config.client_port)).await {
        Ok(l) => l,
        Err(error) => {
            error!(%error, "failed to bind client port");
            return ExitCode::from(111);
        },
    };
    let monitor_listener = match TcpListener::bind((config.listen_address, config.monitor_port)).await {
        Ok(l) => l,
        Err(error) => {
            error!(%error, "failed to bind monitor port");
            return ExitCode::from(111);
        },
    };

    info!(client_port = config.client_port, monitor_port = config.monitor_port, "listening");

    let client_accept = tokio::spawn(accept_clients(server.clone(), client_listener, cancel.clone()));
    let monitor_accept = tokio::spawn(accept_monitors(server.clone(), monitor_listener, cancel.clone()));
    let watchdog = tokio::spawn(server.clone().run_keepalive_watchdog());

    let _ = tokio::join!(client_accept, monitor_accept, watchdog);
    ExitCode::SUCCESS
}

async fn accept_clients(
    server: Arc<Server<TcpStream>>,
    listener: TcpListener,
    cancel: CancellationToken,
) {
    loop {
        let accepted = select! {
            accepted = listener.accept() => accepted,
            _ = cancel.cancelled() => return,
        };
        match accepted {
            Ok((stream, _)) => {
                tokio::spawn(handle_client(server.clone(), stream, cancel.clone()));
            },
            Err(error) => warn!(%error, "failed to accept client connection"),
        }
    }
}

async fn accept_monitors(
    server: Arc<Server<TcpStream>>,
    listener: TcpListener,
    cancel: CancellationToken,
) {
    loop {
        let accepted = select! {
            accepted = listener.accept() => accepted,
            _ = cancel.cancelled() => return,
        };
        match accepted {
            Ok((stream, _)) => {
                tokio::spawn(handle_monitor(server.clone(), stream, cancel.clone()));
            },
            Err(error) => warn!(%error, "failed to accept monitor connection"),
        }
    }
}

#[instrument(skip(server, stream, cancel), err(level = Level::WARN))]
async fn handle_client(
    server: Arc<Server<TcpStream>>,
    stream: TcpStream,
    cancel: CancellationToken,
) -> Result<()> {
    stream.set_nodelay(true).context("setting NODELAY")?;
    let peer = stream.peer_addr().context("peer address")?;

    let mut framed = wire::framed(stream);
    let hello = select! {
        item = framed.next() => item,
        _ = cancel.cancelled() => return Ok(()),
    };
    let Some(Ok(hello)) = hello else {
        debug!("client disconnected before hello");
        return Ok(());
    };

    let MessageBody::HelloRequest { auth_id, client_id, .. } = hello.body else {
        framed
            .send(Envelope::new(
                hello.message_id,
                MessageBody::HelloResponse {
                    result: HelloResultCode::Other,
                    reason: Some("expected HelloRequest".to_owned()),
                },
            ))
            .await?;
        return Ok(());
    };

    let connection_id = {
        let mut clients = server.clients.lock().await;
        let id = clients.next_connection_id();
        let mut client = Client::new(id, peer.ip().to_string(), client_id.clone(), false);
        client.auth_id = auth_id;
        clients.register_client(client);
        id
    };

    framed
        .send(Envelope::new(
            hello.message_id,
            MessageBody::HelloResponse { result: HelloResultCode::Success, reason: None },
        ))
        .await?;

    let stream = framed.into_inner();
    let (endpoint, unsolicited) = Endpoint::spawn(stream, connection_id, cancel.clone());
    server.connections.insert(connection_id, endpoint, unsolicited);

    cancel.cancelled().await;
    server.connections.remove(connection_id);
    server.clients.lock().await.remove_client(connection_id);
    Ok(())
}

#[instrument(skip(server, stream, cancel), err(level = Level::WARN))]
async fn handle_monitor(
    server: Arc<Server<TcpStream>>,
    stream: TcpStream,
    cancel: CancellationToken,
) -> Result<()> {
    stream.set_nodelay(true).context("setting NODELAY")?;
    let peer = stream.peer_addr().context("peer address")?;

    let mut framed = wire::framed(stream);
    let hello = select! {
        item = framed.next() => item,
        _ = cancel.cancelled() => return Ok(()),
    };
    let Some(Ok(hello)) = hello else {
        return Ok(());
    };
    let MessageBody::HelloMonitorRequest { .. } = hello.body else {
        return Ok(());
    };

    let connection_id = {
        let mut clients = server.clients.lock().await;
        let id = clients.next_connection_id();
        clients.register_monitor(MonitorClient::new(id, peer.ip().to_string()));
        id
    };

    framed
        .send(Envelope::new(
            hello.message_id,
            MessageBody::HelloMonitorResponse { result: HelloResultCode::Success, reason: None },
        ))
        .await?;

    let stream = framed.into_inner();
    let (endpoint, unsolicited) = Endpoint::spawn(stream, connection_id, cancel.clone());
    server.connections.insert(connection_id, endpoint, unsolicited);

    cancel.cancelled().await;
    server.connections.remove(connection_id);
    server.clients.lock().await.remove_monitor(connection_id);
    Ok(())
}
