//! Decode game messages carried in the TCP payloads of a pcap or pcapng capture.
//!
//! Usage:
//!   decode_pcap <SCHEMA_DIR> <CAPTURE> [--port N] [--json]
//!
//! Segments are appended per TCP flow in capture order and split into
//! messages with the header's length field. Only flows with the game port on
//! one side are decoded. Decoded messages go to stdout; the per-flow summary
//! and decode failures are logged to stderr (`RUST_LOG` controls the level).

use anyhow::Context;
use datafus_codec::dump::{entity_to_dump, entity_to_json};
use datafus_codec::{loader, Codec, CodecError, FrameHeader};
use pcap_parser::pcapng::Block as PcapNgBlock;
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Linktype, PcapBlockOwned, PcapError};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 5555;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FlowKey {
    src: ([u8; 4], u16),
    dst: ([u8; 4], u16),
}

#[derive(Default)]
struct Flow {
    pending: Vec<u8>,
    decoded: u64,
    failed: u64,
}

struct Decoder<'a> {
    codec: &'a Codec,
    port: u16,
    json: bool,
    packets: u64,
    flows: HashMap<FlowKey, Flow>,
}

impl<'a> Decoder<'a> {
    fn on_frame(&mut self, linktype: Linktype, frame: &[u8]) {
        self.packets += 1;
        let Some((key, payload)) = tcp_payload_from_linktype(linktype, frame) else {
            return;
        };
        if payload.is_empty() || (key.src.1 != self.port && key.dst.1 != self.port) {
            return;
        }
        let direction = if key.dst.1 == self.port { "client" } else { "server" };
        let packet = self.packets;
        let codec = self.codec;
        let json = self.json;
        let flow = self.flows.entry(key).or_default();
        flow.pending.extend_from_slice(payload);

        loop {
            let header = match FrameHeader::read(&flow.pending) {
                Ok(h) => h,
                Err(CodecError::BufferUnderrun { .. }) => break,
                Err(e) => {
                    warn!(packet, error = %e, "unreadable header, dropping buffered bytes");
                    flow.pending.clear();
                    break;
                }
            };
            let frame_len = header.header_len + header.declared_len.unwrap_or(0) as usize;
            if flow.pending.len() < frame_len {
                break;
            }
            match codec.decode_message(&flow.pending[..frame_len]) {
                Ok(decoded) => {
                    flow.decoded += 1;
                    if decoded.consumed != frame_len {
                        warn!(
                            packet,
                            entity = %decoded.entity.name,
                            consumed = decoded.consumed,
                            frame_len,
                            "body length differs from length field"
                        );
                    }
                    if json {
                        println!("{} {} {}", packet, direction, entity_to_json(codec.schema(), &decoded.entity));
                    } else {
                        println!("#{} {}: {}", packet, direction, entity_to_dump(codec.schema(), &decoded.entity));
                    }
                }
                Err(e) => {
                    flow.failed += 1;
                    warn!(packet, id = header.id, error = %e, "message not decoded");
                }
            }
            flow.pending.drain(..frame_len);
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let json = if let Some(pos) = args.iter().position(|a| a == "--json") {
        args.remove(pos);
        true
    } else {
        false
    };
    let port = match args.iter().position(|a| a == "--port") {
        Some(pos) => {
            args.remove(pos);
            if pos >= args.len() {
                anyhow::bail!("--port needs a value");
            }
            let value = args.remove(pos);
            value.parse().with_context(|| format!("invalid port {:?}", value))?
        }
        None => DEFAULT_PORT,
    };
    let mut args = args.into_iter();
    let (Some(schema_dir), Some(capture)) = (args.next().map(PathBuf::from), args.next().map(PathBuf::from)) else {
        anyhow::bail!("usage: decode_pcap <SCHEMA_DIR> <CAPTURE> [--port N] [--json]");
    };

    let schema = loader::load_dir(&schema_dir)
        .with_context(|| format!("loading schema from {}", schema_dir.display()))?;
    let codec = Codec::new(schema);
    let mut decoder = Decoder {
        codec: &codec,
        port,
        json,
        packets: 0,
        flows: HashMap::new(),
    };

    let mut magic = [0u8; 4];
    File::open(&capture)
        .and_then(|mut f| f.read_exact(&mut magic))
        .with_context(|| format!("reading {}", capture.display()))?;
    let file = File::open(&capture)?;
    if magic == [0x0a, 0x0d, 0x0d, 0x0a] {
        run_pcapng(file, &mut decoder)?;
    } else {
        run_legacy_pcap(file, &mut decoder)?;
    }

    info!(capture = %capture.display(), packets = decoder.packets, port, "capture done");
    for (key, flow) in &decoder.flows {
        info!(
            flow = %format!("{}:{} -> {}:{}", ip(key.src.0), key.src.1, ip(key.dst.0), key.dst.1),
            decoded = flow.decoded,
            failed = flow.failed,
            leftover = flow.pending.len(),
            "flow summary"
        );
    }
    Ok(())
}

fn ip(a: [u8; 4]) -> std::net::Ipv4Addr {
    std::net::Ipv4Addr::from(a)
}

fn run_legacy_pcap<R: Read>(file: R, decoder: &mut Decoder<'_>) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcap::LegacyPcapReader::new(1 << 20, file)?;
    let mut linktype = Linktype(1);
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(h) => linktype = h.network,
                    PcapBlockOwned::Legacy(b) => decoder.on_frame(linktype, b.data),
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| anyhow::anyhow!("pcap refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcap read error: {:?}", e)),
        }
    }
    Ok(())
}

fn run_pcapng<R: Read>(file: R, decoder: &mut Decoder<'_>) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcapng::PcapNGReader::new(1 << 20, file)?;
    let mut if_linktypes: Vec<Linktype> = Vec::new();
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                if let PcapBlockOwned::NG(b) = block {
                    match &b {
                        PcapNgBlock::InterfaceDescription(idb) => if_linktypes.push(idb.linktype),
                        PcapNgBlock::EnhancedPacket(epb) => {
                            let lt = if_linktypes.get(epb.if_id as usize).copied().unwrap_or(Linktype(1));
                            decoder.on_frame(lt, epb.packet_data());
                        }
                        _ => {}
                    }
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| anyhow::anyhow!("pcapng refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcapng read error: {:?}", e)),
        }
    }
    Ok(())
}

fn tcp_payload_from_linktype(linktype: Linktype, frame: &[u8]) -> Option<(FlowKey, &[u8])> {
    let l3 = match linktype.0 {
        1 => ethernet_l3(frame)?,
        101 => frame,
        113 => linux_sll_l3(frame)?,
        _ => return None,
    };
    ipv4_tcp_payload(l3)
}

fn ethernet_l3(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < 14 {
        return None;
    }
    let mut off = 12usize;
    let mut ethertype = u16::from_be_bytes([frame[off], frame[off + 1]]);
    off += 2;
    while ethertype == 0x8100 || ethertype == 0x88a8 {
        if frame.len() < off + 4 + 2 {
            return None;
        }
        off += 4;
        ethertype = u16::from_be_bytes([frame[off], frame[off + 1]]);
        off += 2;
    }
    match ethertype {
        0x0800 => Some(&frame[off..]),
        _ => None,
    }
}

fn linux_sll_l3(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < 16 {
        return None;
    }
    match u16::from_be_bytes([frame[14], frame[15]]) {
        0x0800 => Some(&frame[16..]),
        _ => None,
    }
}

fn ipv4_tcp_payload(l3: &[u8]) -> Option<(FlowKey, &[u8])> {
    if l3.len() < 20 || l3[0] >> 4 != 4 {
        return None;
    }
    let ihl = (l3[0] & 0x0f) as usize * 4;
    let total_len = u16::from_be_bytes([l3[2], l3[3]]) as usize;
    if ihl < 20 || total_len < ihl || l3.len() < ihl {
        return None;
    }
    let l3 = if total_len <= l3.len() { &l3[..total_len] } else { l3 };
    if l3[9] != 6 {
        return None; // not TCP
    }
    let tcp = &l3[ihl..];
    if tcp.len() < 20 {
        return None;
    }
    let data_off = (tcp[12] >> 4) as usize * 4;
    if data_off < 20 || tcp.len() < data_off {
        return None;
    }
    let src_ip = [l3[12], l3[13], l3[14], l3[15]];
    let dst_ip = [l3[16], l3[17], l3[18], l3[19]];
    let key = FlowKey {
        src: (src_ip, u16::from_be_bytes([tcp[0], tcp[1]])),
        dst: (dst_ip, u16::from_be_bytes([tcp[2], tcp[3]])),
    };
    Some((key, &tcp[data_off..]))
}
