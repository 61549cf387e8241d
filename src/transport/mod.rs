// MIT License - Copyright (c) 2021 TJForc
// TCP plumbing shared by the command client and the event receiver

pub mod connection;
pub mod dialer;
pub mod listener;

pub use connection::{Connection, ConnectionState, Event};
pub use dialer::{DialOutcome, Dialer};
pub use listener::{Listener, ListenerEvent, SessionTable};
