use anyhow::{Context, Result};

pub async fn run(server_url: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{server_url}/healthz");
    let response = client.get(&url).send().await.with_context(|| format!("failed to reach {url}"))?;
    if response.status().is_success() {
        println!("vf-server at {server_url}: ok");
    } else {
        println!("vf-server at {server_url}: unhealthy ({})", response.status());
    }
    Ok(())
}
