// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Broker connection lifecycle.
//!
//! ```text
//! Disconnected --Start--> Connecting --ConnAck--> Connected
//! Connected --ConnectionLost--> Reconnecting --ConnAck--> Connected
//! any --Shutdown--> Disconnected (terminal)
//! ```
//!
//! Every transition into `Connected` must be followed by
//! [`SubscriptionManager::restore_all`](crate::SubscriptionManager::restore_all)
//! before further messages are handled.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Start,
    ConnAck,
    ConnectionLost,
    Shutdown,
}

impl ConnectionState {
    pub fn next(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (_, Shutdown) => Disconnected,
            (Disconnected, Start) => Connecting,
            (Disconnected, _) => Disconnected,
            (Connecting | Reconnecting | Connected, ConnAck) => Connected,
            // The first connection is retried as long as it takes.
            (Connecting, ConnectionLost) => Connecting,
            (Connected | Reconnecting, ConnectionLost) => Reconnecting,
            (state, Start) => state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl Transition {
    /// True when the connection was just (re)established.
    pub fn requires_restore(&self) -> bool {
        self.to == ConnectionState::Connected && self.from != ConnectionState::Connected
    }
}

/// Current state, observable through a `watch` channel.
pub struct ConnectionLifecycle {
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub fn apply(&self, event: ConnectionEvent) -> Transition {
        let mut from = ConnectionState::Disconnected;
        self.tx.send_modify(|state| {
            from = *state;
            *state = state.next(event);
        });
        Transition {
            from,
            to: *self.tx.borrow(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
