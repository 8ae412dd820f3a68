//! Wire formats used across the AVM host/guest boundary.
//!
//! A [`Format`] turns a serde value into bytes and back. Two concrete
//! formats exist, [`JsonFormat`] and [`MsgPackFormat`], plus the composite
//! [`Multiformat`] which prefixes the inner encoding with a varint
//! [`Codec`] code so the reader can tell which decoder to use.
//!
//! ```rust
//! use avm_sede::{Format, MsgPackFormat, Multiformat};
//! use std::collections::BTreeMap;
//!
//! let format = Multiformat::new(MsgPackFormat);
//! let value: BTreeMap<u32, String> = [(1, "ok".to_string())].into();
//! let bytes = format.encode(&value).unwrap();
//! let back: BTreeMap<u32, String> = format.decode(&bytes).unwrap();
//! assert_eq!(back, value);
//! ```

pub mod codec;
pub mod error;
pub mod format;
pub mod multiformat;

pub use codec::Codec;
pub use error::SedeError;
pub use format::{Format, JsonFormat, MsgPackFormat};
pub use multiformat::Multiformat;
