//! # Meshtac - Tactical Quick-Message Field Test Tool
//!
//! Meshtac exercises the tactical quick-message module on Meshtastic-style
//! mesh radios. It connects to a device over its USB serial link, sends one
//! `SendTacticalMessageRequest` control message directly to the radio stack,
//! then listens to the device's event stream for the phone API
//! acknowledgement line and reports pass/fail.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshtac::device::RadioDevice;
//! use meshtac::events::EventBus;
//! use meshtac::probe::{SignatureWatcher, TacticalRequest, FIRMWARE_ACK_SIGNATURE};
//! use std::sync::Arc;
//! use tokio::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bus = Arc::new(EventBus::new());
//!     let mut watcher = SignatureWatcher::register(bus.clone(), FIRMWARE_ACK_SIGNATURE);
//!
//!     let mut device = RadioDevice::connect(None, 115200).await?;
//!     device.start_reader(bus);
//!     device.send_tactical_request(
//!         TacticalRequest { contact: 0, distance: 0, order: 0 }.to_proto(),
//!     )?;
//!
//!     let found = watcher.wait(Duration::from_secs(10)).await;
//!     println!("{}", if found { "confirmed" } else { "no confirmation" });
//!
//!     watcher.detach();
//!     device.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`probe`] - the send-and-confirm flow: request type, signature watcher
//! - [`device`] - serial link, frame decoding, `ToRadio` transmission
//! - [`events`] - topic pub/sub delivering device notifications to listeners
//! - [`config`] - optional TOML configuration
//! - [`protobuf`] - generated radio serial API types

pub mod config;
pub mod device;
pub mod events;
pub mod logutil;
pub mod probe;
pub mod protobuf;
