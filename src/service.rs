use log::{debug, error, info};
use tokio::{
    sync::{
        mpsc::{self, Sender},
        oneshot,
    },
    task::JoinHandle,
};

use crate::{
    allocator::{AllocatorError, PortAllocator},
    store::Store,
};

pub type AllocatorCommandResponder<T> = oneshot::Sender<Result<T, AllocatorError>>;

pub enum AllocatorCommand {
    Allocate {
        user: String,
        resp: AllocatorCommandResponder<u16>,
    },
    Lookup {
        user: String,
        resp: AllocatorCommandResponder<Option<u16>>,
    },
    Owner {
        port: u16,
        resp: AllocatorCommandResponder<Option<String>>,
    },
}

/// Move the allocator onto its own task.
///
/// Commands are handled one at a time in arrival order, so a scan, claim and
/// persist for one user always completes before the next request is read.
pub fn spawn_allocator<S>(
    mut allocator: PortAllocator<S>,
    buffer: usize,
) -> (Sender<AllocatorCommand>, JoinHandle<()>)
where
    S: Store + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<AllocatorCommand>(buffer);
    // Store calls block, keep them off the async workers.
    let handle = tokio::task::spawn_blocking(move || {
        while let Some(command) = rx.blocking_recv() {
            match command {
                AllocatorCommand::Allocate { user, resp } => {
                    let result = allocator.allocate(&user);
                    if let Err(e) = &result {
                        error!("Failed to allocate a port for '{}': {}", user, e);
                    }
                    if resp.send(result).is_err() {
                        debug!("Caller for '{}' went away before the reply", user);
                    }
                }
                AllocatorCommand::Lookup { user, resp } => {
                    if resp.send(allocator.lookup(&user)).is_err() {
                        debug!("Caller for '{}' went away before the reply", user);
                    }
                }
                AllocatorCommand::Owner { port, resp } => {
                    if resp.send(allocator.owner(port)).is_err() {
                        debug!("Caller for port {} went away before the reply", port);
                    }
                }
            }
        }
        info!("Port allocation service stopped");
    });
    (tx, handle)
}

/// Get the port for `user`, allocating one if the user has none yet.
pub async fn get_free_port(
    user: &str,
    tx: &Sender<AllocatorCommand>,
) -> Result<u16, AllocatorError> {
    let (resp_tx, resp_rx) = oneshot::channel();
    tx.send(AllocatorCommand::Allocate {
        user: user.to_owned(),
        resp: resp_tx,
    })
    .await
    .map_err(|_| AllocatorError::Unavailable)?;

    resp_rx.await.map_err(|_| AllocatorError::Unavailable)?
}

pub async fn lookup_port(
    user: &str,
    tx: &Sender<AllocatorCommand>,
) -> Result<Option<u16>, AllocatorError> {
    let (resp_tx, resp_rx) = oneshot::channel();
    tx.send(AllocatorCommand::Lookup {
        user: user.to_owned(),
        resp: resp_tx,
    })
    .await
    .map_err(|_| AllocatorError::Unavailable)?;

    resp_rx.await.map_err(|_| AllocatorError::Unavailable)?
}

pub async fn port_owner(
    port: u16,
    tx: &Sender<AllocatorCommand>,
) -> Result<Option<String>, AllocatorError> {
    let (resp_tx, resp_rx) = oneshot::channel();
    tx.send(AllocatorCommand::Owner {
        port,
        resp: resp_tx,
    })
    .await
    .map_err(|_| AllocatorError::Unavailable)?;

    resp_rx.await.map_err(|_| AllocatorError::Unavailable)?
}
