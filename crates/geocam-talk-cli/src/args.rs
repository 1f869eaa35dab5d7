//! Command-line argument parsing.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use geocam_talk_core::Params;

pub const USAGE: &str = "\
Usage: geocam-talk <command> [args]

Commands:
  set-credentials [username]                 Store username/password in the OS keychain
  set-server <url> [app_path]                Save the server root (and app path) to the config file
  login                                      Log in with the stored credentials
  logout                                     Unregister, log out and forget credentials
  status                                     Show the configured server and stored username
  get <path> [key=value ...]                 GET <root>/<app>/<path>
  post <path> key=value ... [--audio FILE]   POST to <root>/<app>/<path>
  fetch <path> [--out FILE] [key=value ...]  Download audio from <root>/<path>

Environment:
  GEOCAM_TALK_SERVER_ROOT, GEOCAM_TALK_APP_PATH override the config file.
  RUST_LOG controls logging (default: warn).";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    SetCredentials { username: Option<String> },
    SetServer { server_root: String, app_path: Option<String> },
    Login,
    Logout,
    Status,
    Get { path: String, params: Params },
    Post { path: String, params: Params, audio: Option<PathBuf> },
    Fetch { path: String, params: Params, out: Option<PathBuf> },
    Help,
}

pub fn parse(args: &[String]) -> Result<Command> {
    let Some((command, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };

    match command.as_str() {
        "set-credentials" => Ok(Command::SetCredentials {
            username: rest.first().cloned(),
        }),
        "set-server" => {
            let (server_root, rest) = split_arg(rest, "<url>")?;
            if rest.len() > 1 {
                bail!("set-server takes at most <url> and [app_path]");
            }
            Ok(Command::SetServer {
                server_root,
                app_path: rest.first().cloned(),
            })
        }
        "login" => Ok(Command::Login),
        "logout" => Ok(Command::Logout),
        "status" => Ok(Command::Status),
        "get" => {
            let (path, rest) = split_path(rest)?;
            let (params, _) = parse_params(rest, None)?;
            Ok(Command::Get { path, params })
        }
        "post" => {
            let (path, rest) = split_path(rest)?;
            let (params, audio) = parse_params(rest, Some("--audio"))?;
            Ok(Command::Post { path, params, audio })
        }
        "fetch" => {
            let (path, rest) = split_path(rest)?;
            let (params, out) = parse_params(rest, Some("--out"))?;
            Ok(Command::Fetch { path, params, out })
        }
        "help" | "-h" | "--help" => Ok(Command::Help),
        other => bail!("Unknown command: {}", other),
    }
}

fn split_path(rest: &[String]) -> Result<(String, &[String])> {
    split_arg(rest, "<path>")
}

fn split_arg<'a>(rest: &'a [String], name: &str) -> Result<(String, &'a [String])> {
    rest.split_first()
        .map(|(first, rest)| (first.clone(), rest))
        .ok_or_else(|| anyhow!("Missing {} argument", name))
}

/// Parse `key=value` pairs plus at most one `<flag> FILE` option.
fn parse_params(args: &[String], flag: Option<&str>) -> Result<(Params, Option<PathBuf>)> {
    let mut params = Params::new();
    let mut file = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if Some(arg.as_str()) == flag {
            let value = iter
                .next()
                .ok_or_else(|| anyhow!("{} needs a file argument", arg))?;
            file = Some(PathBuf::from(value));
            continue;
        }
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected key=value, got '{}'", arg))?;
        if key.is_empty() {
            bail!("Empty parameter name in '{}'", arg);
        }
        params.insert(key.to_string(), value.to_string());
    }

    Ok((params, file))
}
