use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use lanchat::chat::console::CommandSet;
use lanchat::chat::hub::Hub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:7667".into());

    info!("lanhub — LAN chat relay");
    let hub = Hub::bind(&addr).await?;
    println!("hub listening on {} (type 'help' for commands)", hub.local_addr());

    let commands = CommandSet::standard();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            break;
        }
        println!("{}", commands.dispatch(&hub, line).await);
    }

    hub.shutdown().await;
    Ok(())
}
