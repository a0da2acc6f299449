use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::core::packet::{parse_header, Packet, HEADER_SIZE};
use crate::error::ProtocolError;

/// Length-delimited framing for [`Packet`]s over a byte stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let len = parse_header(src)?;
        let total = HEADER_SIZE + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total);
        Ok(Some(Packet {
            version: frame[4],
            payload: frame[HEADER_SIZE..].to_vec(),
        }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > crate::config::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::OversizedPacket(item.payload.len()));
        }
        item.write_to(dst);
        Ok(())
    }
}
