//! The receiving end of a framed channel.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, Deserialize, LEN_TYPE_SIZE, LenType};

/// Upper bound for a single frame, a corrupted length prefix fails instead of allocating.
pub const MAX_FRAME_LEN: usize = 1 << 28;

/// The receiving end handle of the communication.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits for the next frame and deserializes it.
    ///
    /// # Arguments
    /// * `buf` - Scratch space for the frame body, the returned `T` borrows from it. Its
    ///   element type fixes the alignment of the body.
    ///
    /// # Returns
    /// The received value or an io error.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        let mut len_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut len_buf).await?;
        let len = LenType::from_be_bytes(len_buf) as usize;

        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} bytes limit"),
            ));
        }

        let elems = len.div_ceil(size_of::<B>());
        buf.clear();
        buf.resize(elems, bytemuck::Zeroable::zeroed());

        let bytes: &mut [u8] = bytemuck::cast_slice_mut(buf.as_mut_slice());
        let body = &mut bytes[..len];
        if let Err(e) = self.rx.read_exact(body).await {
            return Err(match e.kind() {
                io::ErrorKind::UnexpectedEof => io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("stream ended inside a frame of {len} bytes"),
                ),
                _ => e,
            });
        }

        T::deserialize(body)
    }
}
