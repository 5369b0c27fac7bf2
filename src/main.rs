use chatstream::hub::{ChatServer, DEFAULT_CHAT_PORT};
use chatstream::signaling::{DEFAULT_SIGNALING_PORT, SignalingServer};
use tracing::info;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let chat_addr = std::env::var("CHATSTREAM_CHAT_ADDR")
        .unwrap_or_else(|_| format!("0.0.0.0:{}", DEFAULT_CHAT_PORT));
    let signaling_addr = std::env::var("CHATSTREAM_SIGNALING_ADDR")
        .unwrap_or_else(|_| format!("0.0.0.0:{}", DEFAULT_SIGNALING_PORT));

    println!("   Chatstream Server");
    println!("   Chat on {}", chat_addr);
    println!("   Signaling on {}", signaling_addr);
    println!("   Press Ctrl+C to stop\n");

    let chat = ChatServer::new();
    let signaling = SignalingServer::new();

    tokio::select! {
        res = chat.run(&chat_addr) => res,
        res = signaling.run(&signaling_addr) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    }
}
