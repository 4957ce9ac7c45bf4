//! # Chunkcast Core Library
//!
//! `chunkcast-core` implements a partially reliable file distribution
//! protocol on top of two plain UDP channels.
//!
//! ## Features
//!
//! - **Broadcast delivery**: every receiver on the segment overhears every piece
//! - **Gap tracking**: receivers know exactly which pieces they are missing
//! - **Stall recovery**: stalled transfers re-request missing pieces in batches
//! - **Verified completion**: whole-file SHA-256 check before the final rename
//! - **Loss injection**: the sharer can drop frames on purpose to exercise recovery
//!
//! ## Modules
//!
//! - [`catalog`] - Registry of shared files on the sharer side
//! - [`config`] - Configuration management
//! - [`crypto`] - Whole-file and in-memory checksums
//! - [`mod@file`] - Piece arithmetic, staging storage and path helpers
//! - [`protocol`] - Control message and data frame codec
//! - [`receiver`] - Transfers, stall recovery and the transfer manager
//! - [`sharer`] - Control responder and chunk broadcaster
//! - [`transport`] - Owned UDP sockets for each role
//!
//! ## Example
//!
//! ```rust,ignore
//! use chunkcast_core::{config::Config, receiver::Receiver, sharer::Sharer};
//!
//! let config = Config::load()?;
//!
//! // On the sharing machine
//! let sharer = Sharer::bind(&config).await?;
//! sharer.register(Path::new("movie.mkv")).await?;
//! let handle = sharer.spawn();
//!
//! // On a receiving machine
//! let receiver = Receiver::bind(&config).await?;
//! let files = receiver.refresh_listing().await?;
//! receiver.request_file(&files[0].id).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod catalog;
pub mod config;
pub mod crypto;
pub mod error;
pub mod file;
pub mod protocol;
pub mod receiver;
pub mod sharer;
pub mod transport;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default control channel port (UDP)
pub const DEFAULT_CONTROL_PORT: u16 = 10000;

/// Default data channel port (UDP)
pub const DEFAULT_DATA_PORT: u16 = 10001;

/// Default piece size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default maximum number of files a sharer can register
pub const DEFAULT_MAX_FILES: usize = 5;

/// Default maximum number of indices carried by one PARTS request
pub const DEFAULT_BATCH_LIMIT: usize = 250;

/// Largest datagram payload that crosses a standard Ethernet link unfragmented
pub const SAFE_DATAGRAM_SIZE: usize = 1472;

/// Largest payload a single UDP datagram can carry over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;
