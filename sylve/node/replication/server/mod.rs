/// Server-side protocol errors
pub mod error;

use std::{
    io::{Error as IoError, ErrorKind as IoErrorKind},
    net::SocketAddr,
    sync::Arc,
};

use futures_util::{SinkExt, StreamExt};
use sylve_lib::core::planner::{plan, PlanOptions};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
};
use tokio_util::{
    codec::{Decoder, Framed},
    sync::CancellationToken,
};

use crate::{
    node::{
        auth,
        replication::message::{ClientRequest, PullRequest, PushRequest, Request, RequestBody, Response},
        store::event::{BackupReplicationEvent, Direction},
        transfer::{self, pipe::pipe, TransferError, CHUNK_SIZE, PIPE_CAPACITY},
        Manager,
    },
    utils::codec::BincodeCodec,
};
use error::{ServerError, ServerResult};

/// Bind the replication endpoint and serve until canceled
pub async fn serve(
    manager: &Arc<Manager<'static>>,
    listen: SocketAddr,
    cancel: CancellationToken,
) -> ServerResult<()> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(ServerError::SocketError)?;

    serve_with_listener(manager, listener, cancel).await
}

pub async fn serve_with_listener(
    manager: &Arc<Manager<'static>>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> ServerResult<()> {
    info!(
        "Replication endpoint listening on {}",
        listener.local_addr().map_err(ServerError::SocketError)?
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!("Accepted TCP connection from {}", peer);

                    let manager = manager.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_socket(&manager, socket, peer).await {
                            error!("Connection error from {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => error!("Unable to accept TCP connection: {}", e),
            },
        }
    }
}

async fn handle_socket<T>(manager: &Manager<'_>, socket: T, peer: SocketAddr) -> ServerResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = BincodeCodec::default().framed(socket);

    loop {
        let frame = match framed.next().await {
            Some(frame) => frame.map_err(ServerError::CodecError)?,
            None => return Ok(()),
        };

        let ClientRequest { token, body } =
            frame.get_client().ok_or(ServerError::ProtocolMismatch)?;

        if let Err(e) = auth::verify_cluster_jwt(&manager.config.cluster, &token) {
            warn!("Rejected request from {}: {}", peer, e);
            respond(&mut framed, error_response(e.code(), &e.to_string())).await?;
            continue;
        }

        match body {
            RequestBody::Pull(request) => serve_pull(manager, &mut framed, peer, request).await?,
            RequestBody::Push(request) => serve_push(manager, &mut framed, peer, request).await?,
            body => {
                let response = handle_request(manager, body).await;
                respond(&mut framed, response).await?;
            }
        }
    }
}

/// Answer a metadata request. Stream requests are handled separately since
/// they own the socket for their duration.
pub async fn handle_request(manager: &Manager<'_>, body: RequestBody) -> Response {
    match body {
        RequestBody::ListDatasets { prefix } => {
            match manager.engine().list_datasets(prefix.as_deref()).await {
                Ok(datasets) => Response::Datasets(datasets),
                Err(e) => error_response(e.code(), &e.to_string()),
            }
        }
        RequestBody::ListSnapshots { dataset } => match manager.snapshot_chain(&dataset).await {
            Ok(snapshots) => Response::Snapshots(snapshots),
            Err(e) => error_response(e.code(), &e.to_string()),
        },
        RequestBody::ListEvents { limit } => {
            Response::Events(manager.store().recent_events(limit).await)
        }
        _ => error_response("protocol_mismatch", "unexpected request"),
    }
}

/// Plan against the caller's destination chain and stream the result
async fn serve_pull<T>(
    manager: &Manager<'_>,
    framed: &mut Framed<T, BincodeCodec>,
    peer: SocketAddr,
    request: PullRequest,
) -> ServerResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let guard = match manager
        .locks()
        .try_acquire(&request.source_dataset, &request.destination_dataset)
    {
        Some(guard) => guard,
        None => {
            let message = format!(
                "replication already running for {} -> {}",
                request.source_dataset, request.destination_dataset
            );

            return respond(framed, error_response("already_running", &message)).await;
        }
    };

    let event = BackupReplicationEvent::begin(
        Direction::Pull,
        Some(peer.to_string()),
        request.source_dataset.clone(),
        request.destination_dataset.clone(),
        None,
    );
    let event_id = event.id;
    manager.store().append_event(event).await;

    let options = PlanOptions {
        force: request.force,
        with_intermediates: request.with_intermediates,
        target_label: request.snapshot.clone(),
    };

    let planned = match manager.engine().list_snapshots(&request.source_dataset).await {
        Ok(source_chain) => plan(
            &request.source_dataset,
            &request.destination_dataset,
            &source_chain,
            &request.destination_chain,
            &options,
        )
        .map_err(|e| (e.code().to_string(), e.to_string())),
        Err(e) => Err((e.code().to_string(), e.to_string())),
    };

    let plan = match planned {
        Ok(plan) => plan,
        Err((code, message)) => {
            manager
                .store()
                .update_event(event_id, |event| event.complete(Some(message.clone())))
                .await;

            return respond(framed, error_response(&code, &message)).await;
        }
    };

    manager
        .store()
        .update_event(event_id, |event| event.record_plan(&plan))
        .await;

    respond(framed, Response::PullPlan(plan.clone())).await?;

    if plan.noop {
        manager
            .store()
            .update_event(event_id, |event| event.complete(None))
            .await;

        return respond(framed, Response::Done).await;
    }

    let (writer, mut reader) = pipe(PIPE_CAPACITY);

    let outcome = {
        let send = transfer::send_into_pipe(manager.engine(), &plan, writer);

        let pump = async {
            let mut chunk = vec![0u8; CHUNK_SIZE];

            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => return Ok(()),
                    Ok(read) => {
                        respond(&mut *framed, Response::Chunk(chunk[..read].to_vec())).await?;
                    }
                    // Send error is authoritative and reported below
                    Err(_) => return Ok(()),
                }
            }
        };

        let (send_result, pump_result) = tokio::join!(send, pump);

        match pump_result {
            Ok(()) => Ok(send_result.map_err(TransferError::Send)),
            Err(socket_error) => Err(socket_error),
        }
    };

    let result = match outcome {
        Ok(result) => result,
        Err(socket_error) => {
            manager
                .store()
                .update_event(event_id, |event| {
                    event.complete(Some(String::from("connection lost mid-stream")));
                })
                .await;

            return Err(socket_error);
        }
    };

    match result {
        Ok(()) => {
            manager
                .store()
                .update_event(event_id, |event| event.complete(None))
                .await;

            respond(framed, Response::Done).await?;
        }
        Err(e) => {
            manager
                .store()
                .update_event(event_id, |event| event.complete(Some(e.to_string())))
                .await;

            respond(framed, error_response(e.code(), &e.to_string())).await?;
        }
    }

    drop(guard);

    Ok(())
}

/// Receive a stream announced by the caller into local storage
async fn serve_push<T>(
    manager: &Manager<'_>,
    framed: &mut Framed<T, BincodeCodec>,
    peer: SocketAddr,
    request: PushRequest,
) -> ServerResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let plan = request.plan;

    let guard = match manager
        .locks()
        .try_acquire(&plan.source_dataset, &plan.destination_dataset)
    {
        Some(guard) => guard,
        None => {
            let message = format!(
                "replication already running for {} -> {}",
                plan.source_dataset, plan.destination_dataset
            );

            return respond(framed, error_response("already_running", &message)).await;
        }
    };

    let mut event = BackupReplicationEvent::begin(
        Direction::Push,
        Some(peer.to_string()),
        plan.source_dataset.clone(),
        plan.destination_dataset.clone(),
        None,
    );
    event.record_plan(&plan);
    let event_id = event.id;
    manager.store().append_event(event).await;

    respond(&mut *framed, Response::Ready).await?;

    let (mut writer, mut reader) = pipe(PIPE_CAPACITY);
    let feed_framed = &mut *framed;

    let feed = async move {
        loop {
            let frame = match feed_framed.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    writer.close_with_error("connection lost mid-stream");
                    return Err(ServerError::CodecError(e));
                }
                None => {
                    writer.close_with_error("connection lost mid-stream");
                    return Err(ServerError::SocketError(IoError::new(
                        IoErrorKind::UnexpectedEof,
                        "connection closed mid-stream",
                    )));
                }
            };

            let body = match frame.get_client() {
                Some(ClientRequest { body, .. }) => body,
                None => {
                    writer.close_with_error("protocol mismatch");
                    return Err(ServerError::ProtocolMismatch);
                }
            };

            match body {
                RequestBody::Chunk(data) => {
                    // Local receive half went away, its error surfaces
                    // from the receive future
                    if writer.write_all(&data).await.is_err() {
                        return Ok(None);
                    }
                }
                RequestBody::Done => {
                    let _ = writer.shutdown().await;
                    return Ok(None);
                }
                RequestBody::Abort(message) => {
                    writer.close_with_error(message.clone());
                    return Ok(Some(message));
                }
                _ => {
                    writer.close_with_error("protocol mismatch");
                    return Err(ServerError::ProtocolMismatch);
                }
            }
        }
    };

    let receive = async {
        manager
            .engine()
            .receive(&plan.destination_dataset, plan.force_rollback, &mut reader)
            .await
            .map_err(|e| e.to_string())
    };

    let (feed_result, receive_result) = tokio::join!(feed, receive);

    let aborted = match feed_result {
        Ok(aborted) => aborted,
        Err(socket_error) => {
            manager
                .store()
                .update_event(event_id, |event| {
                    event.complete(Some(String::from("connection lost mid-stream")));
                })
                .await;

            return Err(socket_error);
        }
    };

    let result = match (aborted, receive_result) {
        (Some(message), _) => Err(TransferError::Send(message)),
        (None, Err(message)) => Err(TransferError::Receive(message)),
        (None, Ok(())) => Ok(()),
    };

    match result {
        Ok(()) => {
            manager
                .store()
                .update_event(event_id, |event| event.complete(None))
                .await;

            respond(framed, Response::Done).await?;
        }
        Err(e) => {
            manager
                .store()
                .update_event(event_id, |event| event.complete(Some(e.to_string())))
                .await;

            respond(framed, error_response(e.code(), &e.to_string())).await?;
        }
    }

    drop(guard);

    Ok(())
}

async fn respond<T>(framed: &mut Framed<T, BincodeCodec>, response: Response) -> ServerResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    framed
        .send(Request::Server(response))
        .await
        .map_err(ServerError::CodecError)?;

    SinkExt::<Request>::flush(framed)
        .await
        .map_err(ServerError::CodecError)?;

    Ok(())
}

fn error_response(code: &str, message: &str) -> Response {
    Response::Error {
        code: code.to_string(),
        message: message.to_string(),
    }
}
