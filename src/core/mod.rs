//! Core domain types
//!
//! Module hierarchy follows type dependency order:
//! - tag: TagId, AttrUid, SeriesIndex (Layer 0)
//! - spec: TagSpec hierarchical naming (Layer 1)
//! - value: AttrValue prototypes (Layer 2)
//! - registry: attribute + app registration (Layer 3)
//! - cell: app/cell contracts consumed by the pin machine (Layer 4)

pub mod cell;
pub mod error;
pub mod limits;
pub mod registry;
pub mod spec;
pub mod tag;
pub mod value;

pub use cell::{AppRuntime, AttrWriter, PinnedCell};
pub use error::{RegistryError, ValueError};
pub use limits::Limits;
pub use registry::{AppDef, AppFactory, AttrDef, Registry};
pub use spec::TagSpec;
pub use tag::{AttrUid, SeriesIndex, TagId};
pub use value::{AttrValue, ErrValue, PosValue, TagValue, TextValue};
