//! JSON-Schema handling for topic data contracts.
//!
//! Every topic may carry a JSON-Schema document that governs the `data`
//! field of its events. This crate covers the four things the store needs
//! from such a document:
//!
//! - [`compile`] checks a document is well-formed and turns it into a
//!   [`CompiledSchema`] that can be evaluated repeatedly.
//! - [`CompiledSchema::validate`] checks one data document and reports every
//!   violation at once.
//! - [`is_backward_compatible`] decides whether replacing one schema with
//!   another keeps previously valid data valid.
//! - [`insert_defaults`] backfills declared defaults into a data document on
//!   the read path.
//!
//! # Supported vocabulary
//!
//! | Keyword | Notes |
//! |---------|-------|
//! | `type` | string or array of type names |
//! | `properties`, `required`, `additionalProperties` | object shape |
//! | `items`, `minItems`, `maxItems`, `uniqueItems` | single-schema form of `items` only |
//! | `enum`, `const` | JSON equality |
//! | `minimum`, `maximum`, `exclusiveMinimum`, `exclusiveMaximum` | numeric or draft-4 boolean form |
//! | `multipleOf` | |
//! | `minLength`, `maxLength` | counted in characters |
//! | `allOf`, `anyOf`, `oneOf`, `not` | |
//! | `default` | used by [`insert_defaults`] |
//!
//! Annotations (`$schema`, `id`, `$id`, `$comment`, `title`, `description`,
//! `examples`) are accepted and ignored. Any other keyword fails [`compile`].
//!
//! An absent schema (`null`) or an empty object means "no constraint".

mod compat;
mod compile;
mod defaults;
mod error;

pub use compat::{incompatibilities, is_backward_compatible};
pub use compile::{
    compile, compile_str, is_unconstrained, CompiledSchema, JsonType, SUPPORTED_KEYWORDS,
};
pub use defaults::insert_defaults;
pub use error::{SchemaError, SchemaViolations, Violation};
