//! Interactive front-end for the file exchange client.

use clap::Parser;
use file_exchange::{Client, ClientError, Download, Registration};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(name = "fx-client")]
#[command(version = "0.1.0")]
#[command(about = "Interactive file exchange client", long_about = None)]
struct CliArgs {
    /// Directory files are uploaded from and downloaded to
    #[arg(short, long, default_value = ".")]
    workdir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

const HELP: &[(&str, &str)] = &[
    ("/join <server_ip_add> <port>", "Connect to the server application"),
    ("/leave", "Disconnect from the server application"),
    ("/register <handle>", "Register a unique handle or alias"),
    ("/store <filename>", "Send file to server"),
    ("/dir", "Request directory file list from the server"),
    ("/get <filename>", "Fetch a file from the server"),
    ("/exit", "Exit from the application"),
    ("/?", "Show this list"),
];

/// A parsed line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Join(SocketAddr),
    Leave,
    Register(String),
    Store(String),
    Get(String),
    Dir,
    Exit,
    Help,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let (name, rest) = match line.split_once(' ') {
        Some((name, rest)) => (name, Some(rest)),
        None => (line, None),
    };
    let argument = |what: &str| {
        rest.filter(|r| !r.is_empty())
            .map(str::to_string)
            .ok_or_else(|| format!("Command parameters do not match: missing {}", what))
    };

    match (name, rest) {
        ("/join", Some(rest)) => {
            let mut parts = rest.split_whitespace();
            let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err("Usage: /join <server_ip_add> <port>".to_string());
            };
            let ip: IpAddr = host
                .parse()
                .map_err(|_| format!("Invalid IP address {}", host))?;
            let port: u16 = port
                .parse()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| format!("Invalid port number {}", port))?;
            Ok(Command::Join(SocketAddr::new(ip, port)))
        }
        ("/join", None) => Err("Usage: /join <server_ip_add> <port>".to_string()),
        ("/register", _) => argument("handle").map(Command::Register),
        ("/store", _) => argument("filename").map(Command::Store),
        ("/get", _) => argument("filename").map(Command::Get),
        ("/leave", None) => Ok(Command::Leave),
        ("/dir", None) => Ok(Command::Dir),
        ("/exit", None) => Ok(Command::Exit),
        ("/?", None) => Ok(Command::Help),
        _ => Err("Command not found".to_string()),
    }
}

async fn execute(client: &mut Client, command: Command) -> Result<String, ClientError> {
    match command {
        Command::Join(addr) => client
            .join(addr)
            .await
            .map(|()| "Connected to the File Exchange Server successfully!".to_string()),
        Command::Leave => {
            let result = client.leave().await;
            result.map(|()| "Connection closed. Thank you!".to_string())
        }
        Command::Register(handle) => match client.register(&handle).await? {
            Registration::Accepted => Ok(format!("Welcome {}!", handle)),
            Registration::Duplicate => {
                Ok("Error: Registration failed. Handle or alias already exists.".to_string())
            }
        },
        Command::Store(filename) => client.store(&filename).await,
        Command::Get(filename) => match client.get(&filename).await? {
            Download::Saved { path, bytes } => Ok(format!(
                "File received from Server: {} ({} bytes)",
                path.display(),
                bytes
            )),
            Download::NotFound => Ok("Error: File not found in the server.".to_string()),
        },
        Command::Dir => client
            .dir()
            .await
            .map(|listing| format!("Server Directory\n{}", listing)),
        Command::Help => Ok(HELP
            .iter()
            .map(|(cmd, desc)| format!("   {:<30} {}", cmd, desc))
            .collect::<Vec<_>>()
            .join("\n")),
        Command::Exit => Ok("Exiting application!".to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut client = Client::new(args.workdir);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"Enter command: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let output = match parse_command(line) {
            Ok(Command::Exit) => {
                if client.is_connected() {
                    let _ = client.leave().await;
                }
                println!("Exiting application!");
                break;
            }
            Ok(command) => match execute(&mut client, command).await {
                Ok(text) => text,
                Err(e) => format!("Error: {}", e),
            },
            Err(msg) => format!("Error: {}", msg),
        };
        println!("{}\n", output);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join() {
        assert_eq!(
            parse_command("/join 127.0.0.1 5050"),
            Ok(Command::Join("127.0.0.1:5050".parse().unwrap()))
        );
        assert!(parse_command("/join localhost 5050").is_err());
        assert!(parse_command("/join 127.0.0.1 0").is_err());
        assert!(parse_command("/join 127.0.0.1 70000").is_err());
        assert!(parse_command("/join 127.0.0.1").is_err());
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(
            parse_command("/register alice"),
            Ok(Command::Register("alice".to_string()))
        );
        assert_eq!(
            parse_command("/store my file.txt"),
            Ok(Command::Store("my file.txt".to_string()))
        );
        assert!(parse_command("/get").is_err());
        assert!(parse_command("/register ").is_err());
    }

    #[test]
    fn test_parse_exact_commands() {
        assert_eq!(parse_command("/dir"), Ok(Command::Dir));
        assert_eq!(parse_command("/leave"), Ok(Command::Leave));
        assert_eq!(parse_command("/?"), Ok(Command::Help));
        assert!(parse_command("/directory").is_err());
        assert!(parse_command("/dir now").is_err());
    }
}
