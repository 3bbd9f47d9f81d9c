//! Injectable send capability.
//!
//! Dispatch and classifier sync talk to the network only through [`Sender`].
//! Production wires in [`HttpTransport`]; tests use
//! [`recording::RecordingSender`], which answers from a script and keeps
//! every request it was given.

use std::{future::Future, pin::Pin};

use crate::transport::{HttpTransport, TransportRequest, TransportResult};

/// Future returned by [`Sender::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = TransportResult> + Send + 'a>>;

/// Performs one outbound request.
pub trait Sender: Send + Sync + 'static {
    /// Sends the request. Failures are reported in the result, never as
    /// an error.
    fn send(&self, request: TransportRequest) -> SendFuture<'_>;
}

impl Sender for HttpTransport {
    fn send(&self, request: TransportRequest) -> SendFuture<'_> {
        Box::pin(self.execute(request))
    }
}

pub mod recording {
    //! Scripted sender for tests.
    //!
    //! Replies are consumed in order; once the script runs out the fallback
    //! reply is used. Request dumps are rendered from a real
    //! `reqwest::Request`, so they match what `HttpTransport` records.

    use std::{collections::VecDeque, sync::Arc};

    use tokio::sync::Mutex;

    use super::{SendFuture, Sender};
    use crate::transport::{build_request, dump_request, TransportRequest, TransportResult};

    /// One scripted answer.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Reply {
        /// The endpoint answered.
        Response {
            /// HTTP status code
            status: u16,
            /// Response body
            body: String,
        },
        /// No response: connection refused, DNS failure or timeout.
        NoResponse {
            /// Error description
            error: String,
        },
    }

    impl Reply {
        /// Response with a status and body.
        pub fn status(status: u16, body: impl Into<String>) -> Self {
            Self::Response { status, body: body.into() }
        }

        /// Network-level failure.
        pub fn no_response(error: impl Into<String>) -> Self {
            Self::NoResponse { error: error.into() }
        }
    }

    /// Sender that never touches the network.
    #[derive(Clone)]
    pub struct RecordingSender {
        client: reqwest::Client,
        script: Arc<Mutex<VecDeque<Reply>>>,
        fallback: Arc<Mutex<Reply>>,
        requests: Arc<Mutex<Vec<TransportRequest>>>,
    }

    impl RecordingSender {
        /// Sender answering `200 OK` to everything.
        pub fn new() -> Self {
            Self::always(Reply::status(200, "OK"))
        }

        /// Sender answering `reply` to everything.
        pub fn always(reply: Reply) -> Self {
            Self {
                client: reqwest::Client::new(),
                script: Arc::new(Mutex::new(VecDeque::new())),
                fallback: Arc::new(Mutex::new(reply)),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Queues a reply for the next unanswered request.
        pub async fn push_reply(&self, reply: Reply) {
            self.script.lock().await.push_back(reply);
        }

        /// Replaces the reply used once the script is exhausted.
        pub async fn set_fallback(&self, reply: Reply) {
            *self.fallback.lock().await = reply;
        }

        /// Every request sent so far, oldest first.
        pub async fn requests(&self) -> Vec<TransportRequest> {
            self.requests.lock().await.clone()
        }

        /// Number of requests sent so far.
        pub async fn request_count(&self) -> usize {
            self.requests.lock().await.len()
        }
    }

    impl Default for RecordingSender {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Sender for RecordingSender {
        fn send(&self, request: TransportRequest) -> SendFuture<'_> {
            Box::pin(async move {
                let request_dump = match build_request(&self.client, &request) {
                    Ok(built) => dump_request(&built),
                    Err(e) => {
                        self.requests.lock().await.push(request);
                        return TransportResult::no_response(
                            format!("invalid request: {e}"),
                            String::new(),
                            0.0,
                        );
                    },
                };
                self.requests.lock().await.push(request);

                let scripted = self.script.lock().await.pop_front();
                let reply = match scripted {
                    Some(reply) => reply,
                    None => self.fallback.lock().await.clone(),
                };

                match reply {
                    Reply::Response { status, body } => TransportResult {
                        status_code: status,
                        response_dump: format!("HTTP/1.1 {status}\r\n\r\n{body}"),
                        body,
                        request_dump,
                        latency_ms: 1.0,
                    },
                    Reply::NoResponse { error } => {
                        TransportResult::no_response(error, request_dump, 1.0)
                    },
                }
            })
        }
    }

}
