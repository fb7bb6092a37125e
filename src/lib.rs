mod hash;
pub use hash::md5_hex;
pub use hash::Md5Writer;

mod error;
pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;

mod create;
pub use create::create_package;
pub use create::create_package_archive;
pub use create::CreateConfig;
pub use create::INDEX_FILE_NAME;

mod convert;
pub use convert::convert_package;
pub use convert::extract_archive;
pub use convert::extract_package;
pub use convert::ConvertOptions;

mod info;
pub use info::derive_passwords;
pub use info::SerialInfo;
