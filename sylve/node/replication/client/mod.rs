/// Client-side protocol errors
pub mod error;

use futures_util::{SinkExt, StreamExt};
use sylve_lib::core::{
    planner::ReplicationPlan,
    snapshot::{Dataset, Snapshot},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_util::{
    codec::{Decoder, Framed},
    sync::CancellationToken,
};

use crate::{
    config::ClusterConfig,
    node::{
        auth,
        replication::message::{
            ClientRequest, PullRequest, PushRequest, Request, RequestBody, Response,
        },
        store::event::BackupReplicationEvent,
        transfer::{self, pipe::pipe, TransferError, CHUNK_SIZE, PIPE_CAPACITY},
        zfs::StorageEngine,
    },
    utils::codec::BincodeCodec,
};
use error::{ClientError, ClientResult};

/// Replication protocol client.
///
/// One connection serves any number of sequential operations; every frame
/// carries the cluster credential issued at connect time.
pub struct Client<T> {
    framed: Framed<T, BincodeCodec>,
    token: String,
}

impl Client<TcpStream> {
    pub async fn connect(
        address: &str,
        cluster: &ClusterConfig,
    ) -> ClientResult<Client<TcpStream>> {
        let token = auth::create_cluster_jwt(cluster)?;

        let stream = TcpStream::connect(address)
            .await
            .map_err(ClientError::EndpointUnreachable)?;

        Ok(Client::new(stream, token))
    }
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: T, token: String) -> Client<T> {
        Client {
            framed: BincodeCodec::default().framed(stream),
            token,
        }
    }

    async fn next(&mut self) -> ClientResult<Response> {
        next_response(&mut self.framed).await
    }

    async fn exchange(&mut self, body: RequestBody) -> ClientResult<Response> {
        send_frame(&mut self.framed, &self.token, body).await?;
        self.next().await
    }

    pub async fn list_datasets(&mut self, prefix: Option<String>) -> ClientResult<Vec<Dataset>> {
        match self.exchange(RequestBody::ListDatasets { prefix }).await? {
            Response::Datasets(datasets) => Ok(datasets),
            _ => Err(ClientError::ProtocolMismatch),
        }
    }

    pub async fn list_snapshots(&mut self, dataset: &str) -> ClientResult<Vec<Snapshot>> {
        let body = RequestBody::ListSnapshots {
            dataset: dataset.to_string(),
        };

        match self.exchange(body).await? {
            Response::Snapshots(snapshots) => Ok(snapshots),
            _ => Err(ClientError::ProtocolMismatch),
        }
    }

    pub async fn list_events(
        &mut self,
        limit: usize,
    ) -> ClientResult<Vec<BackupReplicationEvent>> {
        match self.exchange(RequestBody::ListEvents { limit }).await? {
            Response::Events(events) => Ok(events),
            _ => Err(ClientError::ProtocolMismatch),
        }
    }

    /// Ask the server to plan a pull. The stream follows immediately, so
    /// the caller must continue with [`Client::pull_stream`].
    pub async fn pull_plan(&mut self, request: PullRequest) -> ClientResult<ReplicationPlan> {
        match self.exchange(RequestBody::Pull(request)).await? {
            Response::PullPlan(plan) => Ok(plan),
            _ => Err(ClientError::ProtocolMismatch),
        }
    }

    /// Receive the stream announced by a pull plan into local storage
    pub async fn pull_stream(
        &mut self,
        engine: &dyn StorageEngine,
        plan: &ReplicationPlan,
        cancel: &CancellationToken,
    ) -> ClientResult<()> {
        if plan.noop {
            return match self.next().await? {
                Response::Done => Ok(()),
                _ => Err(ClientError::ProtocolMismatch),
            };
        }

        let (mut writer, mut reader) = pipe(PIPE_CAPACITY);
        let framed = &mut self.framed;

        let transfer = async {
            let feed = async move {
                loop {
                    let frame = match framed.next().await {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            let e = ClientError::CodecError(e);
                            writer.close_with_error(e.to_string());
                            return Err(e);
                        }
                        None => {
                            writer.close_with_error("connection closed mid-stream");
                            return Err(ClientError::EmptySocket);
                        }
                    };

                    let response = match frame.get_server() {
                        Some(response) => response,
                        None => {
                            writer.close_with_error("protocol mismatch");
                            return Err(ClientError::ProtocolMismatch);
                        }
                    };

                    match response {
                        Response::Chunk(data) => {
                            if let Err(e) = writer.write_all(&data).await {
                                // Local receive half went away, its error
                                // surfaces from the receive future
                                return Err(ClientError::Transfer(TransferError::Receive(
                                    e.to_string(),
                                )));
                            }
                        }
                        Response::Done => {
                            let _ = writer.shutdown().await;
                            return Ok(());
                        }
                        Response::Error { code, message } => {
                            let e = ClientError::from_remote(code, message);
                            writer.close_with_error(e.to_string());
                            return Err(e);
                        }
                        _ => {
                            writer.close_with_error("protocol mismatch");
                            return Err(ClientError::ProtocolMismatch);
                        }
                    }
                }
            };

            let receive = async {
                engine
                    .receive(&plan.destination_dataset, plan.force_rollback, &mut reader)
                    .await
                    .map_err(|e| e.to_string())
            };

            let (feed_result, receive_result) = tokio::join!(feed, receive);

            feed_result?;
            receive_result.map_err(|message| {
                ClientError::Transfer(TransferError::Receive(message))
            })?;

            Ok(())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Transfer(TransferError::Canceled)),
            result = transfer => result,
        }
    }

    /// Stream a locally computed plan to the server
    pub async fn push(
        &mut self,
        engine: &dyn StorageEngine,
        plan: &ReplicationPlan,
        cancel: &CancellationToken,
    ) -> ClientResult<()> {
        let request = RequestBody::Push(PushRequest { plan: plan.clone() });

        match self.exchange(request).await? {
            Response::Ready => (),
            _ => return Err(ClientError::ProtocolMismatch),
        }

        let (writer, mut reader) = pipe(PIPE_CAPACITY);
        let token = self.token.clone();
        let framed = &mut self.framed;

        let transfer = async {
            let send = transfer::send_into_pipe(engine, plan, writer);

            let pump = async {
                let mut chunk = vec![0u8; CHUNK_SIZE];

                loop {
                    match reader.read(&mut chunk).await {
                        Ok(0) => return send_frame(framed, &token, RequestBody::Done).await,
                        Ok(read) => {
                            let body = RequestBody::Chunk(chunk[..read].to_vec());
                            send_frame(framed, &token, body).await?;
                        }
                        Err(e) => {
                            // The send half already failed and is
                            // authoritative; tell the server to drop the
                            // stream
                            let body = RequestBody::Abort(e.to_string());
                            let _ = send_frame(framed, &token, body).await;
                            return Ok(());
                        }
                    }
                }
            };

            let (send_result, pump_result) = tokio::join!(send, pump);

            match (send_result, pump_result) {
                (Err(message), _) => Err(ClientError::Transfer(TransferError::Send(message))),
                (Ok(()), Err(e)) => Err(e),
                (Ok(()), Ok(())) => Ok(()),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Transfer(TransferError::Canceled)),
            result = transfer => result?,
        }

        // The server acknowledges once its receive half finished
        match self.next().await? {
            Response::Done => Ok(()),
            _ => Err(ClientError::ProtocolMismatch),
        }
    }
}

async fn send_frame<T>(
    framed: &mut Framed<T, BincodeCodec>,
    token: &str,
    body: RequestBody,
) -> ClientResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let request = Request::Client(ClientRequest {
        token: token.to_string(),
        body,
    });

    framed.send(request).await.map_err(ClientError::CodecError)?;

    SinkExt::<Request>::flush(framed)
        .await
        .map_err(ClientError::CodecError)?;

    Ok(())
}

async fn next_response<T>(framed: &mut Framed<T, BincodeCodec>) -> ClientResult<Response>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let frame = match framed.next().await {
        Some(frame) => frame.map_err(ClientError::CodecError)?,
        None => return Err(ClientError::EmptySocket),
    };

    match frame.get_server().ok_or(ClientError::ProtocolMismatch)? {
        Response::Error { code, message } => Err(ClientError::from_remote(code, message)),
        response => Ok(response),
    }
}

#[cfg(test)]
mod tests {
    use super::{Client, ClientError};
    use crate::{
        node::{
            auth,
            replication::message::{Request, Response},
        },
        utils::{codec::BincodeCodec, stream::TestStream, testing::CONFIG},
    };

    fn token() -> String {
        auth::create_cluster_jwt(&CONFIG.cluster).unwrap()
    }

    fn client_with_responses(responses: Vec<Response>) -> Client<TestStream> {
        let stream = TestStream::with_output(
            responses.into_iter().map(Request::Server).collect(),
            &mut BincodeCodec::default(),
        )
        .unwrap();

        Client::new(stream, token())
    }

    #[tokio::test]
    async fn test_metadata_exchange() {
        let mut client = client_with_responses(vec![Response::Datasets(Vec::new())]);

        assert!(client.list_datasets(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_frame_is_lifted() {
        let mut client = client_with_responses(vec![Response::Error {
            code: String::from("diverged"),
            message: String::from("destination history diverged"),
        }]);

        let error = client.list_snapshots("tank/a").await.unwrap_err();
        assert!(matches!(error, ClientError::RemoteConflict(_)));
        assert_eq!(error.code(), "diverged");
    }

    #[tokio::test]
    async fn test_unexpected_response_is_a_mismatch() {
        let mut client = client_with_responses(vec![Response::Ready]);

        assert!(matches!(
            client.list_events(10).await.unwrap_err(),
            ClientError::ProtocolMismatch
        ));
    }

    #[tokio::test]
    async fn test_closed_socket() {
        let mut client = Client::new(TestStream::default(), token());

        assert!(matches!(
            client.list_datasets(None).await.unwrap_err(),
            ClientError::EmptySocket
        ));
    }
}
