pub mod host;
pub mod list;
pub mod path;

pub use host::{Credentials, Host, Protocol};
pub use list::AttributedList;
pub use path::{
    Acl, Checksum, EntryType, HashAlgorithm, Path, PathAttributes, PathReference, Permission,
};
