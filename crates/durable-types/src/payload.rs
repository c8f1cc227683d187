use serde::{Deserialize, Serialize};

/// Codec used to encode/decode a [`Payload`]'s bytes.
///
/// The runtime ships a JSON `SerDes`; this enum exists so additional codecs
/// (CBOR, Borsh, ...) can be plugged in later without changing the wire
/// shape of `Payload` itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    Json,
}

/// Opaque, codec-tagged bytes. This is the on-the-wire and on-the-log
/// representation of every user value the runtime persists: step results,
/// invoke inputs/outputs, callback results, execution input/output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub codec: Codec,
}

impl Payload {
    pub fn new(bytes: Vec<u8>, codec: Codec) -> Self {
        Self { bytes, codec }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
