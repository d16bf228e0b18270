#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod db;
mod elf;
mod error;
mod filter;
mod ident;
mod linker;
mod macros;
mod package;
mod paths;
mod pool;
mod query;
mod reader;
mod serialize;

pub use self::db::*;
pub use self::elf::*;
pub use self::error::*;
pub use self::filter::*;
pub use self::ident::*;
pub(crate) use self::macros::*;
pub use self::package::*;
pub use self::paths::*;
pub use self::pool::*;
pub use self::query::*;
pub use self::serialize::*;
