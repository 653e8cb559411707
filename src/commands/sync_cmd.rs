//! Replicate the local database with the remote collection.

use std::time::Duration;

use clap::Args;
use tokio::sync::broadcast::error::RecvError;

use hoodie_store::{DocumentBackend, Store, SyncEvent, SyncOptions, SyncStatus};

use crate::config::Config;

/// Sync with the remote collection
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Run a single replication round and exit
    #[arg(long)]
    once: bool,

    /// Stop after this many seconds (default: until Ctrl-C)
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,
}

impl SyncCommand {
    pub async fn run<B: DocumentBackend>(
        &self,
        store: Store<B>,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let options = if self.once {
            SyncOptions::once()
        } else {
            SyncOptions {
                live: true,
                interval: config.sync_interval(),
            }
        };
        let mut store = store.with_sync_options(options);

        println!("Syncing with {}", store.remote_url());
        store.connect().await;

        {
            let session = store
                .session()
                .ok_or("Replication session did not start")?;
            let mut events = session.subscribe();

            let stop = async {
                match self.duration {
                    Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                    None => {
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
            };
            tokio::pin!(stop);

            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    status = session.wait() => {
                        if status == SyncStatus::Complete {
                            println!("Sync complete.");
                        }
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(event) => print_event(&event),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        }

        store.disconnect().await;
        Ok(())
    }
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Pushed(n) => println!("  ↑ pushed {} change{}", n, plural(*n)),
        SyncEvent::Pulled(n) => println!("  ↓ pulled {} change{}", n, plural(*n)),
        SyncEvent::Error(e) => println!("  ✗ {}", e),
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
