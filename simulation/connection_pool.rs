/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-origin pools of simulated connections.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConnectionHandle {
    origin: usize,
    slot: usize,
    pub(crate) warm: bool,
}

#[derive(Debug, Default)]
struct Connection {
    warm: bool,
    busy: bool,
}

/// Connections are opened lazily up to `max_per_origin`, each serving one
/// request at a time. A connection turns warm once it has served a request.
#[derive(Debug)]
pub(crate) struct ConnectionPool {
    max_per_origin: usize,
    origin_ids: BTreeMap<String, usize>,
    origins: Vec<Vec<Connection>>,
}

impl ConnectionPool {
    pub(crate) fn new(max_per_origin: usize) -> Self {
        Self {
            max_per_origin: max_per_origin.max(1),
            origin_ids: BTreeMap::new(),
            origins: Vec::new(),
        }
    }

    /// Take an idle connection to `origin`, preferring warm ones. `None` when
    /// every allowed connection is busy.
    pub(crate) fn acquire(&mut self, origin: &str) -> Option<ConnectionHandle> {
        let origin_id = match self.origin_ids.get(origin) {
            Some(id) => *id,
            None => {
                let id = self.origins.len();
                self.origin_ids.insert(origin.to_string(), id);
                self.origins.push(Vec::new());
                id
            }
        };
        let connections = &mut self.origins[origin_id];

        let idle = connections
            .iter()
            .position(|connection| !connection.busy && connection.warm)
            .or_else(|| connections.iter().position(|connection| !connection.busy));
        let slot = match idle {
            Some(slot) => slot,
            None if connections.len() < self.max_per_origin => {
                connections.push(Connection::default());
                connections.len() - 1
            }
            None => return None,
        };

        let connection = &mut connections[slot];
        connection.busy = true;
        Some(ConnectionHandle {
            origin: origin_id,
            slot,
            warm: connection.warm,
        })
    }

    pub(crate) fn release(&mut self, handle: ConnectionHandle) {
        if let Some(connection) = self
            .origins
            .get_mut(handle.origin)
            .and_then(|connections| connections.get_mut(handle.slot))
        {
            connection.busy = false;
            connection.warm = true;
        }
    }
}
