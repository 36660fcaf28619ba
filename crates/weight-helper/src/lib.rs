//! Interactive editing of inline LoRA weight tags.
//!
//! [`WeightHelper`] drives one edit context at a time over an
//! [`EditorBuffer`]. It performs no I/O of its own: metadata and preview
//! requests go out as [`FetchTicket`]s and come back through
//! [`WeightHelper::metadata_arrived`] and friends, and the history ledger is
//! persisted through a [`KeyValueStore`].
//!
//! ```
//! use weight_helper::{Edit, HostOptions, TextBuffer, WeightHelper};
//! use weight_helper_core::ScalarKey;
//!
//! let mut helper = WeightHelper::new(HostOptions::default());
//! let tickets = helper
//!     .open(TextBuffer::new("a cat, <lora:foo:1>"), 10, 20)
//!     .unwrap();
//! assert_eq!(tickets.len(), 2);
//!
//! let metadata = weight_helper::Metadata::from_json_str(r#"{"modelFamily":"SD","usingBlocks":null}"#).unwrap();
//! helper.metadata_arrived(&tickets[0], metadata);
//! helper.apply(Edit::Scalar { key: ScalarKey::Te, value: 0.5 }).unwrap();
//!
//! let editor = helper.close().unwrap();
//! assert_eq!(editor.into_string(), "a cat, <lora:foo:0.5>");
//! ```

pub mod cache;
pub mod cli;
pub mod editor;
pub mod fetch;
pub mod session;
pub mod store;

pub use cache::{EntityCache, MetadataEntry};
pub use editor::{EditorBuffer, TextBuffer};
pub use fetch::{BlockRestriction, FetchError, FetchKind, FetchTicket, Metadata, Preview};
pub use session::{Edit, EditContext, EditRejected, OpenError, OpenRejected, Phase, WeightHelper};
pub use store::{load_ledger, save_ledger, JsonFileStore, KeyValueStore, MemoryStore, StoreError};
pub use weight_helper_core::HostOptions;
