//! In-process event-correlation core for the cannonball tracing plugin.
//!
//! Four cooperating pieces, leaves first: the [`flags`] bitset, the
//! [`tables`] that park partially built events, the [`callbacks`] state
//! machine the host drives, and the [`sender`] that ships completed events
//! over a socket. [`config`] and [`logging`] are the install-time ambient
//! layer; [`arena`] and [`events`] are the shared data model underneath
//! everything else.

pub mod arena;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod events;
pub mod flags;
pub mod logging;
pub mod sender;
pub mod tables;

pub use callbacks::{CallbackKind, CallbackRegistration, CallbackState, ImageDescriptor, TranslationBlock};
pub use error::{Result, TracerError};
pub use events::{Event, EventRecord};
pub use flags::FlagSet;
pub use sender::{BatchSender, EventSink, DEFAULT_BATCH_SIZE};
pub use tables::TableCap;
