/// Types that can be written as the body of a transport message.
pub trait Serialize<'a> {
    /// Writes the owned part of the message into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer to extend, it already holds the length prefix.
    ///
    /// # Returns
    /// An optional borrowed tail that is written right after `buf` without copying.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
