// MIT License - Copyright (c) 2021 TJForc
// ISECNet2 command client and RIP event receiver
//
//! # isecnet-bridge
//!
//! TCP/IP communication with alarm panels speaking ISECNet2 (commands)
//! and RIP (event reports).
//!
//! The command side connects to a panel, authenticates with the remote
//! password, sends one command and says goodbye. The receiver side accepts
//! connections from panels, keeps them alive, and hands every alarm event
//! to external hook scripts.
//!
//! ## Quick Start
//!
//! ```no_run
//! use isecnet_bridge::{CommandReply, CommandSession, CommandVariant, Password};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let password = Password::new(1234, 4)?;
//!     let variant = CommandVariant::from_name("status", None)?;
//!
//!     match CommandSession::new("192.168.0.100:9009", password, variant).run().await? {
//!         CommandReply::Status(report) => println!("{}", report),
//!         CommandReply::Ack => println!("ok"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod hooks;
pub mod isecnet;
pub mod receiver;
pub mod rip;
pub mod status;
pub mod timeout;
pub mod transport;

// Re-exports for convenience
pub use client::{CommandSession, CommandState};
pub use command::{ArmMode, CommandReply, CommandVariant, Password};
pub use config::{ReceiverConfig, ReceiverConfigBuilder};
pub use error::{AuthFailure, BridgeError, NakReason, Result};
pub use event::{AlarmEvent, PhotoRef};
pub use hooks::{Hook, HookScripts, HookSink, ScriptHooks};
pub use receiver::{Receiver, ServiceTimer, SessionState, SessionTimer};
pub use rip::{PanelIdentity, RipFrame};
pub use status::{ArmState, GeneralStatusFlags, PartitionStatusFlags, StatusReport};
pub use timeout::{Timeout, TimeoutInfo, TimeoutRegistry};
