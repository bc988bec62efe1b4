use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use super::protocol::{Request, Response, MAX_LINE_BYTES, PROTOCOL_VERSION};
use crate::config::ServerConfig;
use crate::executor::CancellationToken;
use crate::instance::StoreInstance;
use crate::types::{DatabaseError, Document};

/// JSON-lines TCP front end for a [`StoreInstance`]
pub struct Server {
    store: Arc<StoreInstance>,
    query_timeout: Duration,
}

impl Server {
    pub fn new(store: Arc<StoreInstance>, query_timeout: Duration) -> Self {
        Self { store, query_timeout }
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, DatabaseError> {
        let store = StoreInstance::from_config(config)?;
        Ok(Self::new(
            Arc::new(store),
            Duration::from_millis(config.query_timeout_ms),
        ))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<StoreInstance> {
        &self.store
    }

    pub async fn start(&self, addr: &str) -> Result<(), DatabaseError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr, "partitiondb listening");
        self.serve(listener).await
    }

    /// Accept connections forever; each client gets its own task
    pub async fn serve(&self, listener: TcpListener) -> Result<(), DatabaseError> {
        loop {
            let (socket, peer) = listener.accept().await?;
            debug!(%peer, "new connection");

            let store = Arc::clone(&self.store);
            let timeout = self.query_timeout;
            tokio::spawn(async move {
                if let Err(e) = Self::handle_client(socket, store, timeout).await {
                    warn!(%peer, error = %e, "client connection failed");
                }
            });
        }
    }

    async fn handle_client(
        mut socket: TcpStream,
        store: Arc<StoreInstance>,
        timeout: Duration,
    ) -> Result<(), DatabaseError> {
        let (reader, mut writer) = socket.split();
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let limit = u64::try_from(MAX_LINE_BYTES).unwrap_or(u64::MAX).saturating_add(1);

        loop {
            buf.clear();
            let n = (&mut reader).take(limit).read_until(b'\n', &mut buf).await?;
            if n == 0 {
                break;
            }
            if buf.len() > MAX_LINE_BYTES {
                let err = DatabaseError::InvalidQuery(format!("request exceeds {MAX_LINE_BYTES} bytes"));
                Self::write_response(&mut writer, &Response::failure(&err)).await?;
                break;
            }
            let Ok(line) = std::str::from_utf8(&buf) else {
                let err = DatabaseError::InvalidQuery("request is not valid UTF-8".to_string());
                Self::write_response(&mut writer, &Response::failure(&err)).await?;
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }

            // end of input while a request runs means the client went away;
            // pipelined bytes are left in the buffer for the next read
            let disconnected = async {
                match reader.fill_buf().await {
                    Ok(pending) if !pending.is_empty() => std::future::pending::<()>().await,
                    _ => {}
                }
            };
            let response = Self::handle_line_until(&store, line, timeout, disconnected).await;
            Self::write_response(&mut writer, &response).await?;
        }
        Ok(())
    }

    async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), DatabaseError>
    where
        W: AsyncWriteExt + Unpin,
    {
        let mut encoded = response.encode()?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Decode one request line and run it on the blocking pool.
    ///
    /// A query still running after `timeout` has its token cancelled; the
    /// reply is then whatever the query returns once it notices.
    pub async fn handle_line(store: &Arc<StoreInstance>, line: &str, timeout: Duration) -> Response {
        Self::handle_line_until(store, line, timeout, std::future::pending()).await
    }

    /// [`handle_line`](Self::handle_line), also cancelling a query once
    /// `disconnected` resolves
    async fn handle_line_until<D>(
        store: &Arc<StoreInstance>,
        line: &str,
        timeout: Duration,
        disconnected: D,
    ) -> Response
    where
        D: Future<Output = ()>,
    {
        let request = match Request::decode(line) {
            Ok(request) => request,
            Err(e) => return Response::failure(&e),
        };
        let op = request.op();
        let is_query = matches!(request, Request::Query { .. });
        let cancel = CancellationToken::new();

        let worker = {
            let store = Arc::clone(store);
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || dispatch(&store, request, &cancel))
        };

        let joined = if is_query {
            supervise(worker, &cancel, timeout, disconnected, op).await
        } else {
            worker.await
        };

        match joined {
            Ok(response) => response,
            Err(e) => Response::failure(&DatabaseError::StorageUnavailable(format!("{op} worker failed: {e}"))),
        }
    }
}

/// Wait for a query worker; its token is cancelled when `timeout` elapses or
/// `disconnected` resolves, and the worker is still awaited so its reply wins
async fn supervise<D>(
    mut worker: JoinHandle<Response>,
    cancel: &CancellationToken,
    timeout: Duration,
    disconnected: D,
    op: &str,
) -> Result<Response, JoinError>
where
    D: Future<Output = ()>,
{
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline, disconnected);

    tokio::select! {
        joined = &mut worker => return joined,
        () = &mut deadline => {
            warn!(op, timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "query timed out, cancelling");
        }
        () = &mut disconnected => {
            info!(op, "client disconnected, cancelling query");
        }
    }
    cancel.cancel();
    worker.await
}

/// Run one request against the store
fn dispatch(store: &StoreInstance, request: Request, cancel: &CancellationToken) -> Response {
    match request {
        Request::Ping => Response::from_result(Ok(serde_json::json!({ "protocol": PROTOCOL_VERSION }))),
        Request::AddRow { tenant, table, row } => {
            Response::from_result(Document::from_value(row).and_then(|doc| store.add_row(&tenant, &table, doc)))
        }
        Request::ReadTable { tenant, table } => Response::from_result(store.read_table(&tenant, &table)),
        Request::UpdateCell {
            tenant,
            table,
            row_id,
            column,
            value,
        } => Response::from_result(store.update_cell(&tenant, &table, &row_id, &column, value)),
        Request::UpdateRow {
            tenant,
            table,
            row_id,
            patch,
        } => Response::from_result(
            Document::from_value(patch).and_then(|patch| store.update_row(&tenant, &table, &row_id, &patch)),
        ),
        Request::DeleteRow { tenant, table, row_id } => {
            Response::from_result(store.delete_row(&tenant, &table, &row_id))
        }
        Request::ListTables { tenant } => Response::from_result(store.list_tables(&tenant)),
        Request::Query { tenant, query, options } => {
            let options = options.unwrap_or_else(|| store.default_query_options());
            Response::from_result(store.query(&tenant, &query, &options, cancel))
        }
        Request::Usage { tenant } => Response::from_result(store.usage(&tenant)),
        Request::GetSchema { tenant, table } => Response::from_result(store.get_schema(&tenant, &table)),
        Request::RecordSchema { tenant, table, schema } => {
            Response::from_result(store.record_schema(&tenant, &table, schema))
        }
    }
}
