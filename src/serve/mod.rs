//! HTTP host.
//!
//! A tokio runtime thread accepts connections with hyper and forwards each
//! request to one of N worker threads over a per-worker queue. Every worker
//! owns an independent [`App`] (context stack plus handler chain) built by
//! the caller's factory, so no application state is shared between them.
//! Responses come back over a oneshot channel.

pub(crate) mod worker_pool;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;

use bytes::Bytes;
use crossbeam::channel;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::error::{BaldError, HttpSignal};
use crate::http::{Request, Response};
use crate::middleware::App;
use worker_pool::{WorkerQueues, WorkerSender};

/// Builds one application per worker thread.
pub type AppFactory = Arc<dyn Fn() -> Result<App, BaldError> + Send + Sync>;

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub host: [u8; 4],
    pub port: u16,
    pub workers: usize,
    /// Requests buffered per worker before the server answers 503.
    pub queue_capacity: usize,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            host: [127, 0, 0, 1],
            port: 8080,
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
            queue_capacity: 64,
        }
    }
}

/// A request on its way to a worker.
pub(crate) struct RequestData {
    pub(crate) request: Request,
    pub(crate) response_tx: oneshot::Sender<Response>,
}

/// Serve until the workers exit.
///
/// Fails before accepting traffic if any worker's app cannot be built or the
/// port cannot be bound.
pub fn serve(factory: AppFactory, options: ServeOptions) -> Result<(), BaldError> {
    let num_workers = options.workers.max(1);
    let mut queues = WorkerQueues::new(num_workers, options.queue_capacity.max(1));
    let sender = queues.get_sender();

    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), BaldError>>();
    let mut workers = Vec::with_capacity(num_workers);
    for (i, work_rx) in queues.take_receivers().into_iter().enumerate() {
        let factory = factory.clone();
        let ready_tx = ready_tx.clone();
        let worker = thread::Builder::new()
            .name(format!("worker-{}", i))
            .spawn(move || {
                let app = match factory() {
                    Ok(app) => {
                        let _ = ready_tx.send(Ok(()));
                        app
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                worker_loop(i, &app, work_rx);
            })?;
        workers.push(worker);
    }
    drop(ready_tx);

    for _ in 0..num_workers {
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(BaldError::Io(std::io::Error::other("worker exited during startup")))
            }
        }
    }

    let addr = SocketAddr::from((options.host, options.port));
    let (bound_tx, bound_rx) = mpsc::channel::<Result<SocketAddr, std::io::Error>>();
    thread::Builder::new()
        .name("http".to_string())
        .spawn(move || accept_loop(addr, sender, bound_tx))?;

    match bound_rx.recv() {
        Ok(Ok(local)) => tracing::info!(addr = %local, workers = num_workers, "listening"),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(BaldError::Io(std::io::Error::other("server thread exited"))),
    }

    for (i, worker) in workers.into_iter().enumerate() {
        if worker.join().is_err() {
            tracing::error!(worker = i, "worker panicked");
        }
    }
    Ok(())
}

/// Run the tokio runtime and accept connections forever.
fn accept_loop(
    addr: SocketAddr,
    sender: WorkerSender,
    bound_tx: mpsc::Sender<Result<SocketAddr, std::io::Error>>,
) {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = bound_tx.send(Err(e));
            return;
        }
    };

    runtime.block_on(async move {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                let _ = bound_tx.send(Err(e));
                return;
            }
        };
        let _ = bound_tx.send(listener.local_addr());

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let io = TokioIo::new(stream);
            let sender = sender.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| handle_hyper_request(req, sender.clone()));
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::debug!(error = %e, "connection closed with error");
                }
            });
        }
    });
}

/// Forward one hyper request to a worker and wait for its answer.
async fn handle_hyper_request(
    req: hyper::Request<Incoming>,
    sender: WorkerSender,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(error = %e, "failed to read request body");
            return Ok(to_hyper(HttpSignal::new(StatusCode::BAD_REQUEST).into_response()));
        }
    };

    let mut request = Request::new(parts.method, &target).with_body(body);
    request.headers = parts.headers;

    let (response_tx, response_rx) = oneshot::channel();
    if sender
        .try_send(RequestData {
            request,
            response_tx,
        })
        .is_err()
    {
        return Ok(to_hyper(
            HttpSignal::new(StatusCode::SERVICE_UNAVAILABLE).into_response(),
        ));
    }

    match response_rx.await {
        Ok(response) => Ok(to_hyper(response)),
        Err(_) => Ok(to_hyper(
            HttpSignal::new(StatusCode::INTERNAL_SERVER_ERROR).into_response(),
        )),
    }
}

fn to_hyper(response: Response) -> hyper::Response<Full<Bytes>> {
    let mut out = hyper::Response::new(Full::new(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}

/// Processes requests from this worker's queue until it disconnects.
fn worker_loop(worker_id: usize, app: &App, work_rx: channel::Receiver<RequestData>) {
    tracing::debug!(worker = worker_id, "worker started");
    for RequestData {
        request,
        response_tx,
    } in work_rx.iter()
    {
        let response = panic::catch_unwind(AssertUnwindSafe(|| app.respond(request)))
            .unwrap_or_else(|_| {
                tracing::error!(worker = worker_id, "handler panicked");
                HttpSignal::new(StatusCode::INTERNAL_SERVER_ERROR).into_response()
            });
        // The client may have gone away.
        let _ = response_tx.send(response);
    }
    tracing::debug!(worker = worker_id, "worker stopped");
}
