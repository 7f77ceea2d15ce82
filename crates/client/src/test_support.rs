// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test doubles for sq-client tests.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use sq_core::Envelope;

use crate::transport::{Transport, TransportError, TransportEvent, TransportResult};

type SharedQueue<T> = Arc<Mutex<VecDeque<T>>>;

/// Scriptable transport double.
///
/// The paired [`MockHandle`] keeps feeding and inspecting the transport
/// after it has been moved into a connection manager.
pub struct MockTransport {
    connected: bool,
    incoming: SharedQueue<TransportResult<TransportEvent>>,
    outgoing: Arc<Mutex<Vec<String>>>,
    connect_failures: Arc<Mutex<usize>>,
    connect_urls: Arc<Mutex<Vec<String>>>,
}

/// Test-side handle to a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    incoming: SharedQueue<TransportResult<TransportEvent>>,
    outgoing: Arc<Mutex<Vec<String>>>,
    connect_failures: Arc<Mutex<usize>>,
    connect_urls: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    /// Creates a transport and its scripting handle.
    pub fn new() -> (Self, MockHandle) {
        let incoming: SharedQueue<TransportResult<TransportEvent>> =
            Arc::new(Mutex::new(VecDeque::new()));
        let outgoing = Arc::new(Mutex::new(Vec::new()));
        let connect_failures = Arc::new(Mutex::new(0));
        let connect_urls = Arc::new(Mutex::new(Vec::new()));

        let handle = MockHandle {
            incoming: incoming.clone(),
            outgoing: outgoing.clone(),
            connect_failures: connect_failures.clone(),
            connect_urls: connect_urls.clone(),
        };
        let transport = MockTransport {
            connected: false,
            incoming,
            outgoing,
            connect_failures,
            connect_urls,
        };
        (transport, handle)
    }
}

impl MockHandle {
    /// Queues an inbound envelope.
    pub fn push_frame(&self, envelope: &Envelope) {
        self.push_raw(&envelope.to_json().unwrap());
    }

    /// Queues an inbound raw text frame.
    pub fn push_raw(&self, text: &str) {
        self.incoming
            .lock()
            .unwrap()
            .push_back(Ok(TransportEvent::Frame(text.to_string())));
    }

    /// Queues a close observation.
    pub fn push_close(&self, normal: bool) {
        self.incoming.lock().unwrap().push_back(Ok(TransportEvent::Closed { normal }));
    }

    /// Queues a receive-side transport error.
    pub fn push_error(&self, msg: &str) {
        self.incoming
            .lock()
            .unwrap()
            .push_back(Err(TransportError::ReceiveFailed(msg.to_string())));
    }

    /// Makes the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        *self.connect_failures.lock().unwrap() = n;
    }

    /// Everything sent through the transport, as raw frames.
    pub fn sent(&self) -> Vec<String> {
        self.outgoing.lock().unwrap().clone()
    }

    /// Everything sent through the transport, parsed as envelopes.
    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        self.sent().iter().map(|raw| Envelope::from_json(raw).unwrap()).collect()
    }

    /// URLs passed to successful and failed connect attempts, in order.
    pub fn connect_urls(&self) -> Vec<String> {
        self.connect_urls.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn connect(
        &mut self,
        url: &str,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        let url = url.to_string();
        Box::pin(async move {
            self.connect_urls.lock().unwrap().push(url);

            let mut failures = self.connect_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(TransportError::ConnectionFailed("mock failure".into()));
            }
            drop(failures);

            self.connected = true;
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.connected = false;
            Ok(())
        })
    }

    fn send(
        &mut self,
        frame: String,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.connected {
                return Err(TransportError::ConnectionClosed);
            }
            self.outgoing.lock().unwrap().push(frame);
            Ok(())
        })
    }

    fn recv(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = TransportResult<TransportEvent>> + Send + '_>> {
        Box::pin(async move {
            let event = self.incoming.lock().unwrap().pop_front();
            match event {
                Some(event) => {
                    if matches!(event, Ok(TransportEvent::Closed { .. })) {
                        self.connected = false;
                    }
                    event
                }
                // Nothing scripted: behave like an idle connection.
                None => std::future::pending().await,
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
