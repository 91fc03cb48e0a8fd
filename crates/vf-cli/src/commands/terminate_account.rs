use anyhow::{bail, Context, Result};

/// Thin wrapper over `create_and_execute`'s generic `terminate_account`
/// RPC -- kept as its own subcommand since it's destructive and doesn't
/// take a free-form args blob.
pub async fn run(server_url: &str, user_id: &str, device_id: u64) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{server_url}/rpc/terminate_account");
    let body = serde_json::json!({
        "user_id": user_id,
        "device_id": device_id,
        "synchronous": true,
        "args": {},
    });
    let response = client.post(&url).json(&body).send().await.with_context(|| format!("failed to reach {url}"))?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if status.is_success() {
        println!("terminated {user_id}: {text}");
        Ok(())
    } else {
        bail!("terminate_account failed ({status}): {text}");
    }
}
