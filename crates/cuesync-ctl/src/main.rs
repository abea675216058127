//! cuesync-ctl: command-line interface for the cuesync daemon.

use anyhow::{Context, Result};

use cuesync_core::config::DEFAULT_PORT;

mod cmd;

use cmd::command::cmd_command;
use cmd::live::{cmd_file, cmd_nodes, cmd_watch};
use cmd::status::{cmd_node_list, cmd_status};
use cmd::Target;

fn print_usage() {
    println!("Usage: cuesync-ctl [--host <host>] [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                 Show daemon status, connections and play state");
    println!("  nodes                  Follow the converged node graph over /listen");
    println!("  nodes list             Print the daemon's current node graph once");
    println!("  watch                  Print every play state, translated to this clock");
    println!("  file <hash>            Fetch a cue file by content hash");
    println!("  command toggle         Toggle playback on the active controller");
    println!("  command pause          Pause playback");
    println!("  command seek <ms>      Jump to a position in milliseconds");
    println!("  command speed <x>      Set the play speed");
    println!();
    println!("Options:");
    println!("  --host <host>   Daemon host (default: 127.0.0.1)");
    println!("  --port <port>   Daemon port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --host / --port options
    let mut target = Target {
        host: "127.0.0.1".to_string(),
        port: DEFAULT_PORT,
    };
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                target.port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--host" => {
                i += 1;
                target.host = args.get(i).context("--host requires a value")?.clone();
            }
            _ => remaining.push(&args[i]),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | []                => cmd_status(&target).await,
        ["nodes"]                      => cmd_nodes(&target).await,
        ["nodes", "list"]              => cmd_node_list(&target).await,
        ["watch"]                      => cmd_watch(&target).await,
        ["file", hash]                 => cmd_file(&target, hash).await,
        ["command", rest @ ..]         => cmd_command(&target, rest).await,
        ["help"] | ["--help"] | ["-h"] => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
