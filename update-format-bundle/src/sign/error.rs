#[derive(Debug)]
pub enum Error {
    InvalidDefaultKey(rsa::pkcs1::Error),
    ReadPrivateKey(std::io::Error),
    DeserialisePkcs1(rsa::pkcs1::Error),
    ReadInput(std::io::Error),
    InvalidPkcs1v15Signature(rsa::signature::Error),
    CouldNotVerifySignature(rsa::signature::Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidDefaultKey(err) => write!(f, "invalid built-in private key: {err}"),
            Error::ReadPrivateKey(err) => write!(f, "failed to read private key: {err}"),
            Error::DeserialisePkcs1(err) => write!(f, "failed to deserialise PKCS1 PEM: {err}"),
            Error::ReadInput(err) => write!(f, "failed to read data to sign: {err}"),
            Error::InvalidPkcs1v15Signature(err) => write!(f, "invalid pkcs1v15 signature: {err}"),
            Error::CouldNotVerifySignature(err) => write!(f, "failed to verify signature: {err}"),
        }
    }
}
