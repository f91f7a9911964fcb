pub type Kind = u32;
pub const KIND_SIZE: usize = size_of::<Kind>();

pub const CLOSE: Kind = 0;
pub const TEXT: Kind = 1;
pub const BINARY: Kind = 2;
