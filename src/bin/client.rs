use std::time::Duration;

use keyrange_cluster::client::ClientService;
use keyrange_cluster::directory::NetworkAddress;

/// How long to wait for any single request before giving up on the demo run.
const ACK_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut bind_addr: Option<NetworkAddress> = None;
    let mut worker_addr: Option<NetworkAddress> = None;
    let mut master_addr: Option<NetworkAddress> = None;
    let mut count: u32 = 3;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--worker" => {
                worker_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--master" => {
                master_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--count" => {
                count = args[i + 1].parse()?;
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let (Some(bind_addr), Some(worker_addr), Some(master_addr)) =
        (bind_addr, worker_addr, master_addr)
    else {
        eprintln!(
            "Usage: {} --bind <host:port> --worker <host:port> --master <host:port> [--count <n>]",
            args[0]
        );
        eprintln!(
            "Example: {} --bind 127.0.0.1:10045 --worker 127.0.0.1:10043 --master 127.0.0.1:10042",
            args[0]
        );
        std::process::exit(1);
    };

    tracing::info!(
        "Starting client on {} (worker {}, master {})",
        bind_addr,
        worker_addr,
        master_addr
    );

    let client = ClientService::new(&bind_addr.host, bind_addr.port, worker_addr, master_addr)
        .await?;
    client.start();

    // Insert a batch of keys, read them back, then probe a missing one.
    for n in 0..count {
        let key = format!("object{n}");
        let rx = client.key_insert(&key, n as i32, (n * 2) as i32).await;
        let ack = tokio::time::timeout(ACK_TIMEOUT, rx)
            .await
            .map_err(|_| anyhow::anyhow!("insert of {key} timed out"))??;
        tracing::info!(
            "Insert {} -> ({}, {}) status {:?}",
            ack.key,
            ack.chunk,
            ack.subchunk,
            ack.status
        );
    }

    for n in 0..count {
        let key = format!("object{n}");
        let rx = client.key_lookup(&key).await;
        let info = tokio::time::timeout(ACK_TIMEOUT, rx)
            .await
            .map_err(|_| anyhow::anyhow!("lookup of {key} timed out"))??;
        tracing::info!(
            "Lookup {} -> success={} ({}, {})",
            info.key,
            info.success,
            info.chunk,
            info.subchunk
        );
    }

    let rx = client.key_lookup("no_such_key").await;
    let info = tokio::time::timeout(ACK_TIMEOUT, rx)
        .await
        .map_err(|_| anyhow::anyhow!("lookup of no_such_key timed out"))??;
    tracing::info!(
        "Lookup {} -> success={} ({}, {})",
        info.key,
        info.success,
        info.chunk,
        info.subchunk
    );

    client.shutdown().await;
    Ok(())
}
