mod info;
mod socket;

pub(crate) use self::info::info;
pub(crate) use self::socket::socket;
