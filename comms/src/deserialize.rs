use std::io;

/// Types that can be read back from the body of a frame.
pub trait Deserialize<'a>: Sized {
    /// Parses a frame body, possibly borrowing from it.
    ///
    /// # Arguments
    /// * `buf` - The frame body, without the length prefix.
    ///
    /// # Returns
    /// The parsed value or an `InvalidData` io error.
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
