//! Playback commands forwarded to the daemon's active controller.

use anyhow::{Context, Result};
use serde::Deserialize;

use cuesync_core::control::ControlRequest;

use super::http::{base_url, post_json_body};
use super::Target;

#[derive(Deserialize)]
struct CommandResponse {
    success: bool,
}

fn parse(args: &[&str]) -> Result<ControlRequest> {
    let request = match args {
        ["toggle"] => ControlRequest::Toggle,
        ["pause"] => ControlRequest::Pause,
        ["seek", ms] => ControlRequest::GoToTime {
            position_millis: ms.parse().context("seek position must be a number of milliseconds")?,
        },
        ["speed", x] => ControlRequest::PlaySpeed {
            play_speed: x.parse().context("speed must be a number")?,
        },
        other => anyhow::bail!("unknown command: {}", other.join(" ")),
    };
    Ok(request)
}

pub async fn cmd_command(target: &Target, args: &[&str]) -> Result<()> {
    let request = parse(args)?;
    let resp: CommandResponse =
        post_json_body(&format!("{}/command", base_url(target)), &request).await?;
    if resp.success {
        println!("Command accepted.");
    } else {
        println!("Controller declined the command.");
    }
    Ok(())
}
