use anyhow::{bail, Context, Result};

/// Triggers the Scheduler's broad orphan scan (spec §4.4) out of band --
/// useful for "scanning for provisioning" after restoring from a backup
/// or recovering from a host loss where the normal startup scan already
/// ran before the affected rows existed.
pub async fn run(server_url: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{server_url}/admin/scan_orphans");
    let response = client.post(&url).send().await.with_context(|| format!("failed to reach {url}"))?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if status.is_success() {
        println!("{text}");
        Ok(())
    } else {
        bail!("scan_orphans failed ({status}): {text}");
    }
}
