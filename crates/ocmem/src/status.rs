// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ocmem status` command: probe a running service over HTTP and print a
//! short operational summary.

use std::time::Duration;

use ocmem_core::OcmemError;

/// Probe timeout; a healthy local service answers in milliseconds.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Run the `status` command against a local service.
pub async fn run_status(port: u16) -> Result<(), OcmemError> {
    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .map_err(|e| OcmemError::Internal(format!("cannot build HTTP client: {e}")))?;

    let base = format!("http://127.0.0.1:{port}");
    let health: serde_json::Value = client
        .get(format!("{base}/api/health"))
        .send()
        .await
        .map_err(|e| OcmemError::Provider {
            message: format!("service unreachable on port {port}: {e}"),
            source: Some(Box::new(e)),
        })?
        .json()
        .await
        .map_err(|e| OcmemError::Provider {
            message: format!("malformed health response: {e}"),
            source: Some(Box::new(e)),
        })?;

    println!("opencode-mem @ {base}");
    println!("  status:      {}", health["status"].as_str().unwrap_or("?"));
    println!("  version:     {}", health["version"].as_str().unwrap_or("?"));
    println!("  database:    {}", onoff(health["dbConnected"].as_bool()));
    println!("  embeddings:  {}", onoff(health["vectorEnabled"].as_bool()));
    println!("  queue:       {}", onoff(health["queueRunning"].as_bool()));
    println!(
        "  sse clients: {}",
        health["sseClients"].as_u64().unwrap_or(0)
    );

    if let Ok(response) = client.get(format!("{base}/api/stats")).send().await
        && let Ok(stats) = response.json::<serde_json::Value>().await
    {
        let counts = &stats["counts"];
        println!("  sessions:     {}", counts["sessions"].as_i64().unwrap_or(0));
        println!(
            "  observations: {}",
            counts["observations"].as_i64().unwrap_or(0)
        );
        println!("  memories:     {}", counts["memories"].as_i64().unwrap_or(0));
        println!("  vectors:      {}", counts["vectors"].as_i64().unwrap_or(0));
        println!(
            "  dead letters: {}",
            counts["deadLetters"].as_i64().unwrap_or(0)
        );
    }

    Ok(())
}

fn onoff(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "ok",
        Some(false) => "off",
        None => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onoff_renders_states() {
        assert_eq!(onoff(Some(true)), "ok");
        assert_eq!(onoff(Some(false)), "off");
        assert_eq!(onoff(None), "?");
    }
}
