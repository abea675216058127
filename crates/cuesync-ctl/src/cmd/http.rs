//! Shared HTTP request helpers for CLI commands.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::Target;

pub fn base_url(target: &Target) -> String {
    format!("http://{}:{}", target.host, target.port)
}

pub fn ws_url(target: &Target, path: &str) -> String {
    format!("ws://{}:{}{}", target.host, target.port, path)
}

pub async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to cuesyncd at {}, is it running?", url))?
        .json::<T>()
        .await
        .context("failed to parse response")
}

pub async fn post_json_body<T, R>(url: &str, body: &T) -> Result<R>
where
    T: Serialize,
    R: for<'de> Deserialize<'de>,
{
    let resp = reqwest::Client::new()
        .post(url)
        .json(body)
        .send()
        .await
        .with_context(|| format!("failed to connect to cuesyncd at {}, is it running?", url))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("{} {}", status, text);
    }

    resp.json::<R>().await.context("failed to parse response")
}
