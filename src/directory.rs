use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ConfigResolver;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::util::{read_unpoisoned, write_unpoisoned};

/// Client name to server pool mapping shared by every in-flight call.
///
/// A refresh swaps the whole `Arc<[Endpoint]>` and never changes a pool a call already holds.
/// Unknown clients are loaded from `<client>.listOfServers` on first use.
#[derive(Debug, Default)]
pub struct ServerDirectory {
    resolver: Option<ConfigResolver>,
    servers: RwLock<HashMap<String, Arc<[Endpoint]>>>,
    // Clients whose current pool came from configuration.
    from_config: RwLock<HashSet<String>>,
}

impl ServerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(resolver: ConfigResolver) -> Self {
        Self {
            resolver: Some(resolver),
            ..Self::default()
        }
    }

    pub fn set_servers<I>(&self, client: impl Into<String>, endpoints: I)
    where
        I: IntoIterator<Item = Endpoint>,
    {
        let client = client.into();
        write_unpoisoned(&self.from_config).remove(&client);
        self.install(client, endpoints);
    }

    pub fn remove(&self, client: &str) {
        write_unpoisoned(&self.servers).remove(client);
        write_unpoisoned(&self.from_config).remove(client);
    }

    fn install<I>(&self, client: String, endpoints: I)
    where
        I: IntoIterator<Item = Endpoint>,
    {
        let endpoints: Arc<[Endpoint]> = endpoints.into_iter().collect();
        write_unpoisoned(&self.servers).insert(client, endpoints);
    }

    pub fn clients(&self) -> Vec<String> {
        let mut clients: Vec<String> = read_unpoisoned(&self.servers).keys().cloned().collect();
        clients.sort();
        clients
    }

    pub fn servers(&self, client: &str) -> Result<Arc<[Endpoint]>, Error> {
        let cached = read_unpoisoned(&self.servers).get(client).cloned();
        let pool = match cached {
            Some(pool) => pool,
            None => {
                self.refresh(client)?;
                read_unpoisoned(&self.servers)
                    .get(client)
                    .cloned()
                    .unwrap_or_else(|| Arc::from(Vec::new()))
            }
        };
        if pool.is_empty() {
            return Err(Error::NoServersAvailable {
                client: client.to_owned(),
            });
        }
        Ok(pool)
    }

    /// Re-reads the server list of `client` from configuration.
    ///
    /// A configured list replaces the cached pool. Without one, only a pool that itself came
    /// from configuration is dropped; pools installed with [`set_servers`](Self::set_servers)
    /// are kept.
    pub fn refresh(&self, client: &str) -> Result<(), Error> {
        let Some(resolver) = &self.resolver else {
            return Ok(());
        };
        match resolver.server_list(client)? {
            Some(endpoints) => {
                debug!(client, servers = endpoints.len(), "server list refreshed");
                write_unpoisoned(&self.from_config).insert(client.to_owned());
                self.install(client.to_owned(), endpoints);
            }
            None => {
                if read_unpoisoned(&self.from_config).contains(client) {
                    debug!(client, "server list removed from configuration");
                    self.remove(client);
                }
            }
        }
        Ok(())
    }

    pub fn refresh_all(&self) -> Result<(), Error> {
        let mut first_error = None;
        for client in self.clients() {
            if let Err(error) = self.refresh(&client) {
                warn!(client = %client, error = %error, "server list refresh failed");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Runs [`refresh_all`](Self::refresh_all) every `interval` until the handle is dropped.
    pub fn start_refresher(self: &Arc<Self>, interval: Duration) -> DirectoryRefresher {
        let (stop, stopped) = mpsc::channel::<()>();
        let directory = Arc::clone(self);
        let interval = interval.max(Duration::from_millis(1));
        let join = thread::spawn(move || {
            loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let _ = directory.refresh_all();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        DirectoryRefresher {
            stop: Some(stop),
            join: Some(join),
        }
    }
}

#[derive(Debug)]
pub struct DirectoryRefresher {
    stop: Option<mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl Drop for DirectoryRefresher {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
