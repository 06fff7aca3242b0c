//! Length-delimited MBAP framing for `tokio_util::codec`.
//!
//! Each decoded item is exactly one Modbus/TCP frame as declared by its
//! header length field, so split or coalesced TCP segments never change
//! what gets forwarded.

use crate::error::ProxyError;
use bytes::BytesMut;
use proxy_core::{declared_frame_len, Frame, MBAP_PREFIX_LEN};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Clone, Copy, Default)]
pub struct MbapCodec;

impl Decoder for MbapCodec {
    type Item = Frame;
    type Error = ProxyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProxyError> {
        let frame_len = match declared_frame_len(src)? {
            Some(len) => len,
            None => {
                src.reserve(MBAP_PREFIX_LEN - src.len());
                return Ok(None);
            }
        };
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }
        let bytes = src.split_to(frame_len).freeze();
        Ok(Some(Frame::new(bytes)?))
    }
}

impl Encoder<Frame> for MbapCodec {
    type Error = ProxyError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProxyError> {
        dst.extend_from_slice(frame.as_bytes());
        Ok(())
    }
}
