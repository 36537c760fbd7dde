//! Thin command-line client for logd.
//!
//! Exit codes: 0 on success, 1 on I/O or protocol errors, 2 on usage
//! errors (from argument parsing).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::io::Write as _;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use logd_client::Client;
use logd_protocol::Batch;

/// Command-line client for a logd server.
#[derive(Parser, Debug)]
#[command(name = "log-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address.
    #[arg(long, global = true, default_value = "127.0.0.1:1774")]
    host: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write messages as one batch; bodies come from --message flags or,
    /// without any, one message per stdin line.
    Write {
        /// Topic to write to.
        #[arg(long)]
        topic: String,
        /// Message body; repeatable.
        #[arg(short, long)]
        message: Vec<String>,
    },
    /// Read batches from a byte offset and print their messages.
    Read {
        /// Topic to read from.
        #[arg(long)]
        topic: String,
        /// Byte offset of the first batch.
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Stop after this many messages; 0 keeps following past the head.
        #[arg(long, default_value_t = 0)]
        limit: u64,
    },
    /// Follow a topic from its head, printing messages as they commit.
    Tail {
        /// Topic to tail.
        #[arg(long)]
        topic: String,
        /// Carried in the request; tails always follow.
        #[arg(long, default_value_t = 0)]
        limit: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("log-cli: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect(&cli.host).await?;

    match cli.command {
        Command::Write { topic, message } => {
            let mut batch = Batch::new(topic)?;
            if message.is_empty() {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Some(line) = lines.next_line().await? {
                    if !line.is_empty() {
                        batch.append(line.into_bytes())?;
                    }
                }
            } else {
                for m in message {
                    batch.append(m.into_bytes())?;
                }
            }

            let offset = client.batch(&batch).await?;
            println!("{offset}");
            client.close().await?;
        }
        Command::Read {
            topic,
            offset,
            limit,
        } => {
            let (start, _batches) = client.read(&topic, offset, limit).await?;
            eprintln!("reading {topic} from offset {start}");
            print_batches(&mut client).await?;
            if limit != 0 {
                client.close().await?;
            }
        }
        Command::Tail { topic, limit } => {
            let (head, _) = client.tail(&topic, limit).await?;
            eprintln!("tailing {topic} from offset {head}");
            print_batches(&mut client).await?;
        }
    }
    Ok(())
}

/// Prints every message body of every scanned batch, one per line.
async fn print_batches(client: &mut Client) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = std::io::stdout();
    while let Some(batch) = client.next_batch().await? {
        let mut out = stdout.lock();
        for msg in batch.messages() {
            out.write_all(&msg.body)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
    }
    Ok(())
}
