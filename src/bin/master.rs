use keyrange_cluster::directory::NetworkAddress;
use keyrange_cluster::master::MasterService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut bind_addr: Option<NetworkAddress> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let Some(bind_addr) = bind_addr else {
        eprintln!("Usage: {} --bind <host:port>", args[0]);
        eprintln!("Example: {} --bind 127.0.0.1:10042", args[0]);
        std::process::exit(1);
    };

    tracing::info!("Starting master on {}", bind_addr);

    let master = MasterService::new(&bind_addr.host, bind_addr.port).await?;
    master.start();

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    master.shutdown().await;
    Ok(())
}
