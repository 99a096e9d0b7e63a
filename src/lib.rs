//! Field-upgrade serial bootloader.
//!
//! Device side: a byte-at-a-time [`parser::Parser`] fed from the receive
//! interrupt through a [`receiver::Receiver`], and a cooperative
//! [`bootloader::Bootloader`] state machine which answers host commands,
//! programs firmware packets into flash and hands over to a validated
//! application image.
//!
//! Host side: [`host::Programmer`] drives the same protocol over any
//! `embedded-hal` serial port, with a linux constructor and the `frame-boot`
//! utility behind the `linux` and `util` features.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

pub mod protocol;
pub mod parser;
pub mod error;
pub mod config;
pub mod info;
pub mod hal;
pub mod firmware;
pub mod dispatch;
pub mod receiver;
pub mod launch;
pub mod bootloader;
pub mod host;

#[cfg(any(test, feature = "std"))]
pub mod sim;

#[cfg(feature = "cortex-m")]
pub mod cortex;

#[cfg(feature = "linux")]
pub mod linux;

pub use crate::bootloader::{BootState, Bootloader, MODE_ENTRY_NOTICE};
pub use crate::config::{BootConfig, ConfigError};
pub use crate::error::ErrorCode;
pub use crate::host::{Options, Programmer};
pub use crate::info::DeviceInfo;
pub use crate::launch::{Launch, Launcher};
pub use crate::parser::{Frame, ParseError, Parser};
pub use crate::protocol::{BuildError, Command};
pub use crate::receiver::{Inbox, Receiver};
