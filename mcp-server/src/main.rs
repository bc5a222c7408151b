use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    anneal_mcp_server::run_main().await?;
    Ok(())
}
