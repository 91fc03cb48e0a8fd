//! Generic administrative entry point (spec §6 "CLI surface ... reuse the
//! same CreateAndExecute entry point"): posts any registered operation
//! method to the HTTP front door exactly the way a client would.

use anyhow::{bail, Context, Result};
use serde_json::Value;

pub async fn run(server_url: &str, user_id: &str, device_id: u64, method: &str, args_json: &str, synchronous: bool) -> Result<()> {
    let args: Value = serde_json::from_str(args_json).context("--args must be valid JSON")?;
    let client = reqwest::Client::new();
    let url = format!("{server_url}/rpc/{method}");
    let body = serde_json::json!({
        "user_id": user_id,
        "device_id": device_id,
        "synchronous": synchronous,
        "args": args,
    });
    let response = client.post(&url).json(&body).send().await.with_context(|| format!("failed to reach {url}"))?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if status.is_success() {
        println!("{text}");
        Ok(())
    } else {
        bail!("{method} failed ({status}): {text}");
    }
}
