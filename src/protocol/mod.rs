//! Wire protocol: binary frame codec and synthesis event numbers

pub mod event;
pub mod frame;

pub use event::Event;
pub use frame::{
    Compression, Frame, MessageFlags, MessageType, Serialization, decode, encode_audio_request,
    encode_event_request, encode_full_request,
};
