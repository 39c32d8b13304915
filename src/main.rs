#[tokio::main]
async fn main() {
    if let Err(error) = waziper_gateway::run().await {
        eprintln!("fatal: {error}");
        std::process::exit(1);
    }
}
