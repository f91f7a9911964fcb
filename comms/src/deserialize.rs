use std::io;

/// Types that can be read back from the body of a transport message.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
