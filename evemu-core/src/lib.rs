//! Wire-level building blocks shared by every service: the value tree, its
//! binary marshal format, diagnostic dumps, typed argument decoding and the
//! call error taxonomy.

pub mod args;
pub mod codec;
pub mod dump;
pub mod error;
pub mod ids;
pub mod value;

pub use args::{arg, AnyArgs, DecodeError, FromArgs, FromWire, IntoWire, NoArgs, SingleIntArg};
pub use codec::{decode, decode_with_limits, encode, encode_with_limits, CodecError, DecodeLimits};
pub use dump::{dump, render, render_with_limits, DumpLevel};
pub use error::{CallError, ErrorCode, CALL_ERROR_TYPE};
pub use ids::{CharacterId, ClientId, EntityId, HandleId, IdAllocator};
pub use value::{SubStream, WireValue};
