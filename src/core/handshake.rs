//! Password request/response round trip between the worker and the UI side.
//!
//! Both queues hold a single item. The worker pushes one [`PasswordRequest`] and
//! then suspends on the response queue until the UI answers. The UI answers with
//! a non-blocking send, so answering when nobody asked fails fast instead of
//! stalling the UI loop.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::progress::Polled;

/// Worker asks the user for a keystore password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordRequest {
    pub file: String,
    /// 1-based attempt counter for this file.
    pub attempt: u32,
    pub retry: bool,
    pub previous_error: Option<String>,
}

/// The user's answer to a [`PasswordRequest`].
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordResponse {
    pub password: String,
    pub cancelled: bool,
    pub skip: bool,
}

impl PasswordResponse {
    pub fn submit(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            cancelled: false,
            skip: false,
        }
    }

    pub fn cancel() -> Self {
        Self {
            password: String::new(),
            cancelled: true,
            skip: false,
        }
    }

    pub fn skip() -> Self {
        Self {
            password: String::new(),
            cancelled: false,
            skip: true,
        }
    }
}

impl fmt::Debug for PasswordResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordResponse")
            .field("password", &"<redacted>")
            .field("cancelled", &self.cancelled)
            .field("skip", &self.skip)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("worker is not waiting for a password")]
    NotWaiting,
    #[error("worker is no longer running")]
    Closed,
}

/// Create the request and response queues.
pub fn password_channels() -> (PasswordPrompter, PasswordRequestReceiver, PasswordResponder) {
    let (request_tx, request_rx) = mpsc::channel(1);
    let (response_tx, response_rx) = mpsc::channel(1);

    (
        PasswordPrompter {
            requests: request_tx,
            responses: response_rx,
        },
        PasswordRequestReceiver { rx: request_rx },
        PasswordResponder { tx: response_tx },
    )
}

/// Worker half: sends requests, waits for answers.
pub struct PasswordPrompter {
    requests: mpsc::Sender<PasswordRequest>,
    responses: mpsc::Receiver<PasswordResponse>,
}

impl PasswordPrompter {
    /// Ask for a password and wait for the answer.
    ///
    /// If the UI side has gone away the wait ends with a cancel response.
    pub async fn ask(&mut self, request: PasswordRequest) -> PasswordResponse {
        if self.requests.send(request).await.is_err() {
            return PasswordResponse::cancel();
        }
        self.next_response()
            .await
            .unwrap_or_else(PasswordResponse::cancel)
    }

    /// Block until the UI side answers. `None` once the responder is dropped.
    pub async fn next_response(&mut self) -> Option<PasswordResponse> {
        self.responses.recv().await
    }
}

/// UI half: receives requests.
pub struct PasswordRequestReceiver {
    rx: mpsc::Receiver<PasswordRequest>,
}

impl PasswordRequestReceiver {
    pub async fn poll(&mut self, timeout: Duration) -> Polled<PasswordRequest> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(request)) => Polled::Item(request),
            Ok(None) => Polled::Closed,
            Err(_) => Polled::Timeout,
        }
    }
}

/// UI half: answers requests without ever blocking.
#[derive(Clone)]
pub struct PasswordResponder {
    tx: mpsc::Sender<PasswordResponse>,
}

impl PasswordResponder {
    pub fn try_respond(&self, response: PasswordResponse) -> Result<(), HandshakeError> {
        self.tx.try_send(response).map_err(|e| match e {
            TrySendError::Full(_) => HandshakeError::NotWaiting,
            TrySendError::Closed(_) => HandshakeError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(file: &str) -> PasswordRequest {
        PasswordRequest {
            file: file.to_string(),
            attempt: 1,
            retry: false,
            previous_error: None,
        }
    }

    #[tokio::test]
    async fn round_trip_delivers_answer_to_worker() {
        let (mut prompter, mut requests, responder) = password_channels();

        let worker = tokio::spawn(async move { prompter.ask(request("b.json")).await });

        let received = match requests.poll(Duration::from_secs(1)).await {
            Polled::Item(r) => r,
            other => panic!("expected request, got {:?}", other),
        };
        assert_eq!(received.file, "b.json");

        responder.try_respond(PasswordResponse::submit("pw")).unwrap();
        let answer = worker.await.unwrap();
        assert_eq!(answer, PasswordResponse::submit("pw"));
    }

    #[tokio::test]
    async fn second_answer_fails_fast_while_slot_is_taken() {
        let (_prompter, _requests, responder) = password_channels();

        responder.try_respond(PasswordResponse::skip()).unwrap();
        assert_eq!(
            responder.try_respond(PasswordResponse::skip()),
            Err(HandshakeError::NotWaiting)
        );
    }

    #[tokio::test]
    async fn answer_after_worker_exit_reports_closed() {
        let (prompter, _requests, responder) = password_channels();
        drop(prompter);
        assert_eq!(
            responder.try_respond(PasswordResponse::cancel()),
            Err(HandshakeError::Closed)
        );
    }

    #[tokio::test]
    async fn dropped_responder_unblocks_worker_as_cancel() {
        let (mut prompter, requests, responder) = password_channels();
        drop(responder);

        let answer = prompter.ask(request("c.json")).await;
        assert!(answer.cancelled);
        drop(requests);
    }

    #[test]
    fn debug_output_hides_password() {
        let rendered = format!("{:?}", PasswordResponse::submit("hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
