//! Tagged framing for the broker's line-oriented wire protocol.
//!
//! A frame is one line: `<tag> <VERB> <json-args>`, optionally followed by
//! a **literal** when the json-args contain a `"literal": <n>` field — the
//! next `n` bytes on the wire belong to that command and must be consumed
//! in full (or streamed in chunks, see [`LiteralReader`]) before the next
//! line can be read. This keeps the small, frequent control traffic human
//! readable while letting large item payloads skip JSON's escaping
//! entirely.

mod error;
mod frame;
mod greeting;
mod literal;
mod verb;

pub use error::WireError;
pub use frame::{CommandLine, FrameReader, FrameWriter, ResponseLine, ResponseStatus};
pub use greeting::{Hello, PROTOCOL_VERSION};
pub use literal::LiteralReader;
pub use verb::Verb;
