use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use rand::Rng;

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::retry::AttemptHistory;
use crate::util::{read_unpoisoned, write_unpoisoned};

/// Picks the endpoint for a new server slot of a call.
///
/// Called once for the first attempt and once per failover. Never called for same-server
/// retries. `history` holds every attempt the call has made so far.
pub trait ServerSelector: Send + Sync {
    fn select(
        &self,
        client: &str,
        pool: &[Endpoint],
        history: &AttemptHistory,
    ) -> Result<Endpoint, Error>;
}

/// Round-robin over the pool with one cursor per client name.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    cursors: RwLock<HashMap<String, Arc<AtomicUsize>>>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }

    fn cursor(&self, client: &str) -> Arc<AtomicUsize> {
        if let Some(cursor) = read_unpoisoned(&self.cursors).get(client) {
            return Arc::clone(cursor);
        }
        let mut cursors = write_unpoisoned(&self.cursors);
        Arc::clone(cursors.entry(client.to_owned()).or_default())
    }
}

impl ServerSelector for RoundRobinSelector {
    fn select(
        &self,
        client: &str,
        pool: &[Endpoint],
        history: &AttemptHistory,
    ) -> Result<Endpoint, Error> {
        if pool.is_empty() {
            return Err(Error::NoServersAvailable {
                client: client.to_owned(),
            });
        }
        let start = self.cursor(client).fetch_add(1, Ordering::Relaxed) % pool.len();
        let selected = (0..pool.len())
            .map(|offset| &pool[(start + offset) % pool.len()])
            .find(|endpoint| !history.contains(endpoint))
            .unwrap_or(&pool[start]);
        Ok(selected.clone())
    }
}

/// Uniform choice among endpoints the call has not tried yet, or among the whole pool once
/// every endpoint has been tried.
#[derive(Debug, Default)]
pub struct RandomSelector;

impl ServerSelector for RandomSelector {
    fn select(
        &self,
        client: &str,
        pool: &[Endpoint],
        history: &AttemptHistory,
    ) -> Result<Endpoint, Error> {
        if pool.is_empty() {
            return Err(Error::NoServersAvailable {
                client: client.to_owned(),
            });
        }
        let untried: Vec<&Endpoint> = pool
            .iter()
            .filter(|endpoint| !history.contains(endpoint))
            .collect();
        let mut rng = rand::rng();
        let selected = if untried.is_empty() {
            &pool[rng.random_range(0..pool.len())]
        } else {
            untried[rng.random_range(0..untried.len())]
        };
        Ok(selected.clone())
    }
}
