//! # Radio Device Communication
//!
//! Serial link to a mesh radio: port auto-detection, connection management,
//! frame decoding, and `ToRadio` control message transmission.
//!
//! The wire protocol is the radio's binary serial API: protobuf messages
//! wrapped in `0x94 0xC3` length-prefixed frames, with a SLIP fallback for
//! firmware builds that still emit SLIP-wrapped messages. Devices left in
//! text console mode produce plain log lines instead; those are forwarded as
//! events too, so a probe works in either serial mode.
//!
//! A [`RadioDevice`] owns the port behind an `Arc<Mutex<..>>` shared with one
//! background reader task. The reader decodes whatever arrives and publishes
//! [`DeviceEvent`]s onto an [`EventBus`]; writers take the same lock to emit
//! one frame at a time.

use crate::device::framing::{encode_frame, FrameAccumulator};
use crate::device::slip::SlipDecoder;
use crate::events::{DeviceEvent, EventBus, TextEvent, TOPIC_LOG_LINE, TOPIC_PACKET};
use crate::logutil::escape_log;
use crate::protobuf::radio_generated as proto;
use anyhow::Result;
use bytes::BytesMut;
use log::{debug, error, info, trace, warn};
use serialport::{SerialPort, SerialPortType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::time::{sleep, Duration};

pub mod framing;
pub mod slip;

/// Errors from port discovery and opening. Everything past the open call is
/// reported through `anyhow` with context, as elsewhere in the crate.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),
    #[error("no serial port found; connect a device or pass --port")]
    NoPortDetected,
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
}

fn hex_snippet(data: &[u8], max: usize) -> String {
    use std::cmp::min;
    data.iter()
        .take(min(max, data.len()))
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("")
}

/// Pick a serial port when the user did not name one.
///
/// Radios enumerate as USB CDC devices, so USB ports win over legacy UARTs.
/// Only called once a connection is actually being attempted.
pub fn detect_port() -> Result<String, DeviceError> {
    let ports = serialport::available_ports().map_err(DeviceError::Enumerate)?;
    let chosen = ports
        .iter()
        .find(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
        .or_else(|| ports.first())
        .ok_or(DeviceError::NoPortDetected)?;
    info!("Auto-detected serial port {}", chosen.port_name);
    Ok(chosen.port_name.clone())
}

/// Represents an open connection to a radio device.
pub struct RadioDevice {
    port_name: String,
    #[allow(dead_code)]
    baud_rate: u32,
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    reader: Option<ReaderHandle>,
}

struct ReaderHandle {
    shutdown: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl RadioDevice {
    /// Open the serial link. When `port` is `None` the device path is
    /// auto-detected from the attached serial devices.
    pub async fn connect(port: Option<&str>, baud_rate: u32) -> Result<Self> {
        use std::io::Read;
        let port_name = match port {
            Some(p) => p.to_string(),
            None => detect_port()?,
        };
        info!(
            "Initializing radio device on {} at {} baud",
            port_name, baud_rate
        );

        let mut builder =
            serialport::new(&port_name, baud_rate).timeout(Duration::from_millis(500));
        // Some USB serial adapters need explicit settings
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder.open().map_err(|e| DeviceError::Open {
            port: port_name.clone(),
            source: e,
        })?;

        // Toggle DTR/RTS to reset/ensure device wakes (common for ESP32 based boards)
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        sleep(Duration::from_millis(150)).await;

        // Clear any existing buffered startup text
        let mut purge_buf = [0u8; 512];
        if let Ok(available) = port.bytes_to_read() {
            if available > 0 {
                let _ = port.read(&mut purge_buf);
            }
        }
        debug!("Serial port initialized");

        let device = RadioDevice {
            port_name,
            baud_rate,
            port: Arc::new(Mutex::new(port)),
            reader: None,
        };

        // Wake the serial API so the firmware starts streaming FromRadio
        // frames; without this most builds stay silent.
        let mut request_id: u32 = rand::random();
        if request_id == 0 {
            request_id = 1;
        }
        device.send_want_config(request_id)?;

        Ok(device)
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Spawn the background reader task publishing decoded events to `bus`.
    pub fn start_reader(&mut self, bus: Arc<EventBus>) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let reader = RadioReader {
            port: self.port.clone(),
            framer: FrameAccumulator::new(),
            slip: SlipDecoder::new(),
            line_buf: String::new(),
            bus,
            shutdown: shutdown.clone(),
            our_node_id: None,
            binary_frames_seen: false,
        };
        let task = tokio::spawn(reader.run());
        self.reader = Some(ReaderHandle { shutdown, task });
    }

    /// Send the tactical quick-message control request directly to the radio
    /// stack. This is a top-level `ToRadio` message, not a per-peer
    /// `MeshPacket`, so it carries no destination or port number.
    pub fn send_tactical_request(&self, request: proto::SendTacticalMessageRequest) -> Result<()> {
        use proto::to_radio::PayloadVariant;
        let msg = proto::ToRadio {
            payload_variant: Some(PayloadVariant::SendTacticalMessageRequest(request)),
        };
        self.send_toradio(msg)
    }

    /// Send a `ToRadio.WantConfigId` request to trigger the config/event push.
    pub fn send_want_config(&self, request_id: u32) -> Result<()> {
        use proto::to_radio::PayloadVariant;
        debug!("Sending want_config_id=0x{:08x}", request_id);
        let msg = proto::ToRadio {
            payload_variant: Some(PayloadVariant::WantConfigId(request_id)),
        };
        self.send_toradio(msg)
    }

    /// Send a heartbeat frame (optional, can help keep link active)
    #[allow(dead_code)]
    pub fn send_heartbeat(&self) -> Result<()> {
        use proto::to_radio::PayloadVariant;
        let nonce = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
            & 0xffff) as u32;
        let msg = proto::ToRadio {
            payload_variant: Some(PayloadVariant::Heartbeat(proto::Heartbeat { nonce })),
        };
        self.send_toradio(msg)
    }

    fn send_toradio(&self, msg: proto::ToRadio) -> Result<()> {
        use prost::Message;
        use std::io::Write;
        let mut payload = Vec::with_capacity(256);
        msg.encode(&mut payload)?;
        let frame = encode_frame(&payload)?;
        let mut port = self.port.lock().unwrap();
        port.write_all(&frame)?;
        port.flush()?;
        debug!("Sent ToRadio LEN frame ({} bytes payload)", payload.len());
        Ok(())
    }

    /// Stop the reader task and release the connection. Safe to call once;
    /// later calls are no-ops.
    pub async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting from radio device");
        if let Some(handle) = self.reader.take() {
            handle.shutdown.store(true, Ordering::SeqCst);
            if let Err(e) = handle.task.await {
                warn!("Reader task did not shut down cleanly: {}", e);
            }
        }
        Ok(())
    }
}

/// What a single decoded `FromRadio` frame means to us.
#[derive(Debug)]
enum DecodedFrame {
    Text(TextEvent),
    Log(String),
    MyInfo(u32),
    NodeSeen { num: u32, long_name: String },
    ConfigComplete(u32),
    Other(String),
}

/// Decode one framed protobuf payload. Returns `None` when the bytes are not
/// a parseable `FromRadio` message.
fn decode_frame(frame: &[u8]) -> Option<DecodedFrame> {
    use proto::from_radio::PayloadVariant as FRPayload;
    use proto::mesh_packet::PayloadVariant as MPPayload;
    use prost::Message;

    let buf = BytesMut::from(frame);
    let msg = proto::FromRadio::decode(buf.freeze()).ok()?;
    match msg.payload_variant? {
        FRPayload::Packet(pkt) => {
            if let Some(MPPayload::Decoded(data)) = pkt.payload_variant {
                let port =
                    proto::PortNum::try_from(data.portnum).unwrap_or(proto::PortNum::UnknownApp);
                if port == proto::PortNum::TextMessageApp {
                    if let Ok(text) = std::str::from_utf8(&data.payload) {
                        let dest = if pkt.to != 0 { Some(pkt.to) } else { None };
                        return Some(DecodedFrame::Text(TextEvent {
                            source: pkt.from,
                            dest,
                            channel: Some(pkt.channel),
                            content: text.to_string(),
                        }));
                    }
                }
                return Some(DecodedFrame::Other(format!(
                    "PKT from=0x{:08x} port={:?} len={} hex={}",
                    pkt.from,
                    port,
                    data.payload.len(),
                    hex_snippet(&data.payload, 12)
                )));
            }
            Some(DecodedFrame::Other(format!(
                "PKT from=0x{:08x} (encrypted)",
                pkt.from
            )))
        }
        FRPayload::LogRecord(rec) => {
            let line = if rec.source.is_empty() {
                rec.message
            } else {
                format!("{}: {}", rec.source, rec.message)
            };
            Some(DecodedFrame::Log(line))
        }
        FRPayload::MyInfo(info) => Some(DecodedFrame::MyInfo(info.my_node_num)),
        FRPayload::NodeInfo(n) => Some(DecodedFrame::NodeSeen {
            num: n.num,
            long_name: n.user.map(|u| u.long_name).unwrap_or_default(),
        }),
        FRPayload::ConfigCompleteId(id) => Some(DecodedFrame::ConfigComplete(id)),
    }
}

/// Background task: read the port, decode, publish events.
struct RadioReader {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    framer: FrameAccumulator,
    slip: SlipDecoder,
    line_buf: String,
    bus: Arc<EventBus>,
    shutdown: Arc<AtomicBool>,
    our_node_id: Option<u32>,
    binary_frames_seen: bool,
}

impl RadioReader {
    async fn run(mut self) {
        info!("Starting radio reader task");
        let mut interval = tokio::time::interval(Duration::from_millis(10));
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            interval.tick().await;
            if let Err(e) = self.read_and_process().await {
                error!("Reader error: {} - continuing operation", e);
                sleep(Duration::from_millis(100)).await;
            }
        }
        info!("Radio reader task shutting down");
    }

    async fn read_and_process(&mut self) -> Result<()> {
        use std::io::Read;
        let mut buffer = [0; 1024];
        let read_result = {
            let mut port = self.port.lock().unwrap();
            port.read(&mut buffer)
        };

        match read_result {
            Ok(bytes_read) if bytes_read > 0 => {
                let raw = &buffer[..bytes_read];
                trace!("RAW {} bytes: {}", bytes_read, hex_snippet(raw, 64));

                // Length-prefixed framing first: 0x94 0xC3 len_hi len_lo
                self.framer.push(raw);
                let mut framed = false;
                while let Some(frame) = self.framer.next_frame() {
                    framed = true;
                    self.binary_frames_seen = true;
                    self.handle_frame(&frame);
                }

                // SLIP framing path for firmwares that still use it
                for frame in self.slip.push(raw) {
                    framed = true;
                    self.binary_frames_seen = true;
                    trace!("SLIP frame {} bytes", frame.len());
                    self.handle_frame(&frame);
                }

                // Plain console output. Only taken when nothing binary was
                // extracted, so binary streams don't leak onto the log topic.
                if !framed && !self.binary_frames_seen {
                    self.collect_console_text(raw);
                }
            }
            Ok(_) => {
                // No data available, normal
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                // Timeout is normal
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {
                debug!("Serial read interrupted (EINTR), likely shutdown in progress");
            }
            Err(e) => {
                warn!("Serial read error (continuing): {}", e);
                sleep(Duration::from_millis(50)).await;
            }
        }

        Ok(())
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        match decode_frame(frame) {
            Some(DecodedFrame::Text(ev)) => {
                debug!(
                    "Device text from 0x{:08x}: {}",
                    ev.source,
                    escape_log(&ev.content)
                );
                self.bus.publish(TOPIC_PACKET, &DeviceEvent::Text(ev));
            }
            Some(DecodedFrame::Log(line)) => {
                trace!("Device log: {}", escape_log(&line));
                self.bus.publish(TOPIC_LOG_LINE, &DeviceEvent::LogLine(line));
            }
            Some(DecodedFrame::MyInfo(num)) => {
                if self.our_node_id.is_none() {
                    info!("Connected device node id 0x{:08x}", num);
                }
                self.our_node_id = Some(num);
            }
            Some(DecodedFrame::NodeSeen { num, long_name }) => {
                debug!("Node 0x{:08x} '{}'", num, escape_log(&long_name));
            }
            Some(DecodedFrame::ConfigComplete(id)) => {
                debug!("Config push complete (id=0x{:08x})", id);
            }
            Some(DecodedFrame::Other(summary)) => {
                trace!("{}", summary);
            }
            None => {
                trace!(
                    "Undecodable frame ({} bytes): {}",
                    frame.len(),
                    hex_snippet(frame, 16)
                );
            }
        }
    }

    fn collect_console_text(&mut self, raw: &[u8]) {
        self.line_buf.push_str(&String::from_utf8_lossy(raw));
        while let Some(pos) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=pos).collect();
            let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
            if !line.is_empty() {
                trace!("Console line: {}", escape_log(line));
                self.bus
                    .publish(TOPIC_LOG_LINE, &DeviceEvent::LogLine(line.to_string()));
            }
        }
        // A device stuck mid-line must not grow the buffer forever.
        if self.line_buf.len() > 4096 {
            let line = std::mem::take(&mut self.line_buf);
            self.bus.publish(TOPIC_LOG_LINE, &DeviceEvent::LogLine(line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn frame_of(msg: &proto::FromRadio) -> Vec<u8> {
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn decodes_text_packet() {
        use proto::mesh_packet::PayloadVariant as MPPayload;
        let msg = proto::FromRadio {
            id: 0,
            payload_variant: Some(proto::from_radio::PayloadVariant::Packet(
                proto::MeshPacket {
                    from: 0xDEAD_BEEF,
                    to: 0xFFFF_FFFF,
                    channel: 2,
                    payload_variant: Some(MPPayload::Decoded(proto::Data {
                        portnum: proto::PortNum::TextMessageApp as i32,
                        payload: bytes::Bytes::from_static(b"Inf 25m Observe"),
                        ..Default::default()
                    })),
                    ..Default::default()
                },
            )),
        };

        match decode_frame(&frame_of(&msg)) {
            Some(DecodedFrame::Text(ev)) => {
                assert_eq!(ev.source, 0xDEAD_BEEF);
                assert_eq!(ev.dest, Some(0xFFFF_FFFF));
                assert_eq!(ev.channel, Some(2));
                assert_eq!(ev.content, "Inf 25m Observe");
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn decodes_log_record_with_source_prefix() {
        let msg = proto::FromRadio {
            id: 0,
            payload_variant: Some(proto::from_radio::PayloadVariant::LogRecord(
                proto::LogRecord {
                    message: "Received SendTacticalMessageRequest".into(),
                    source: "PhoneAPI".into(),
                    ..Default::default()
                },
            )),
        };

        match decode_frame(&frame_of(&msg)) {
            Some(DecodedFrame::Log(line)) => {
                assert_eq!(line, "PhoneAPI: Received SendTacticalMessageRequest");
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn non_text_port_is_summarized_not_published() {
        use proto::mesh_packet::PayloadVariant as MPPayload;
        let msg = proto::FromRadio {
            id: 0,
            payload_variant: Some(proto::from_radio::PayloadVariant::Packet(
                proto::MeshPacket {
                    from: 1,
                    payload_variant: Some(MPPayload::Decoded(proto::Data {
                        portnum: proto::PortNum::RoutingApp as i32,
                        payload: bytes::Bytes::from_static(&[0x08, 0x01]),
                        ..Default::default()
                    })),
                    ..Default::default()
                },
            )),
        };
        assert!(matches!(
            decode_frame(&frame_of(&msg)),
            Some(DecodedFrame::Other(_))
        ));
    }

    #[test]
    fn garbage_bytes_decode_to_none() {
        assert!(decode_frame(&[0xFF, 0x00, 0x13, 0x37]).is_none());
    }

    #[test]
    fn my_info_carries_node_id() {
        let msg = proto::FromRadio {
            id: 0,
            payload_variant: Some(proto::from_radio::PayloadVariant::MyInfo(
                proto::MyNodeInfo {
                    my_node_num: 0x0BAD_CAFE,
                },
            )),
        };
        assert!(matches!(
            decode_frame(&frame_of(&msg)),
            Some(DecodedFrame::MyInfo(0x0BAD_CAFE))
        ));
    }
}
