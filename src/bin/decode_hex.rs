//! Decode hex-encoded messages against a Datafus schema directory, or encode
//! JSON-rendered messages back to hex.
//!
//! Usage:
//!   decode_hex <SCHEMA_DIR> [--json | --encode] [INPUT ...]
//!
//! With no INPUT arguments, one message per line is read from stdin.
//! Options:
//!   --json    Print each message as one JSON line (entity type under `_name`)
//!   --encode  Read JSON lines as printed by `--json` and print the framed message as hex
//!
//! Exit code 1 if any message failed to decode or encode.

use anyhow::Context;
use datafus_codec::dump::{entity_from_json, entity_to_dump, entity_to_json};
use datafus_codec::{loader, Codec};
use std::io::{self, BufRead};
use std::path::PathBuf;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

fn decode_one(codec: &Codec, line: &str, json: bool) -> anyhow::Result<()> {
    let bytes = hex::decode(line.trim()).context("invalid hex")?;
    let decoded = codec.decode_message(&bytes)?;
    let trailing = bytes.len() - decoded.consumed;
    if trailing > 0 {
        warn!(entity = %decoded.entity.name, trailing, "trailing bytes after message");
    }
    if json {
        println!("{}", entity_to_json(codec.schema(), &decoded.entity));
    } else {
        println!("{}", entity_to_dump(codec.schema(), &decoded.entity));
    }
    Ok(())
}

fn encode_one(codec: &Codec, line: &str) -> anyhow::Result<()> {
    let json: serde_json::Value = serde_json::from_str(line.trim()).context("invalid JSON")?;
    let entity = entity_from_json(&json)?;
    println!("{}", hex::encode(codec.encode_message(&entity)?));
    Ok(())
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    match args.iter().position(|a| a == flag) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let json = take_flag(&mut args, "--json");
    let encode = take_flag(&mut args, "--encode");
    if args.is_empty() || (json && encode) {
        anyhow::bail!("usage: decode_hex <SCHEMA_DIR> [--json | --encode] [INPUT ...]");
    }
    let schema_dir = PathBuf::from(args.remove(0));
    let schema = loader::load_dir(&schema_dir)
        .with_context(|| format!("loading schema from {}", schema_dir.display()))?;
    let codec = Codec::new(schema);

    let inputs: Vec<String> = if args.is_empty() {
        io::stdin()
            .lock()
            .lines()
            .collect::<io::Result<Vec<_>>>()?
            .into_iter()
            .filter(|l| !l.trim().is_empty())
            .collect()
    } else {
        args
    };

    let mut failed = 0usize;
    for (i, line) in inputs.iter().enumerate() {
        let result = if encode {
            encode_one(&codec, line)
        } else {
            decode_one(&codec, line, json)
        };
        if let Err(e) = result {
            error!(input = i + 1, error = %format!("{:#}", e), "message failed");
            failed += 1;
        }
    }
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
