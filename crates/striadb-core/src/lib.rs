//! # `StriaDB` Core
//!
//! Column-oriented analytical storage engine with compressed bitmap
//! indexes.
//!
//! `StriaDB` stores read-mostly tabular data partitioned by rows; each
//! column lives in its own dense binary file next to a persisted null
//! mask and an opaque index blob. Range and membership predicates over a
//! column resolve through cooperating paths: a bitmap index bounds the
//! answer, a sorted data file answers exactly through binary search, and
//! a scan decides whatever remains.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use striadb_core::{
//!     ColumnSchema, ColumnType, ContinuousRange, FileManager, Partition, StoreConfig,
//! };
//! use std::sync::Arc;
//!
//! let config = StoreConfig::load(None)?;
//! let files = Arc::new(FileManager::new(&config.file_manager));
//! let mut part = Partition::create("./data/events", "events", files, &config)?;
//! part.add_column(ColumnSchema::new("energy", ColumnType::F64))?;
//!
//! // ... write data, then query:
//! let energy = part.column("energy").unwrap();
//! let everything = striadb_core::Bitvector::filled(true, part.rows());
//! let hits = energy.evaluate_continuous(&ContinuousRange::between(2.5, 7.0), &everything)?;
//! println!("{} rows match", hits.cnt());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod array;
pub mod bitvector;
pub mod column;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod file_manager;
pub mod index;
pub mod oid;
pub mod partition;
pub mod predicate;
pub mod roster;

pub use array::{ArrayView, Element};
pub use bitvector::{Bitvector, IndexSet};
pub use column::{Column, ColumnSchema, ColumnType, SelectTarget, ValuesVec};
pub use config::{StaleIndexPolicy, StoreConfig};
pub use dictionary::Dictionary;
pub use error::{Error, Result};
pub use file_manager::{AccessHint, FileBlock, FileManager};
pub use index::{BinnedIndex, ColumnIndex};
pub use oid::Oid;
pub use partition::{Partition, PartitionContext, PartitionState};
pub use predicate::{ContinuousRange, DiscreteRange, RangeOp};
pub use roster::Roster;
