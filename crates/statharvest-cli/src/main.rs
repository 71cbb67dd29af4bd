#[tokio::main]
async fn main() -> anyhow::Result<()> {
    statharvest_cli::run().await
}
