use std::io;
use std::io::{Read, Write};

use md5::{Digest, Md5};

const CHUNK_LEN: usize = 8192;

/// MD5 of a whole stream, rendered as 32 lowercase hex chars the way the
/// package headers and the bundle index carry it.
pub fn md5_hex<R: Read + ?Sized>(input: &mut R) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; CHUNK_LEN];
    loop {
        let count = input.read(&mut buf)?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Writer that digests everything passing through it, so package bodies can
/// be checksummed while they stream to their sink.
pub struct Md5Writer<W> {
    inner: W,
    hasher: Md5,
}

impl<W: Write> Md5Writer<W> {
    pub fn new(inner: W) -> Md5Writer<W> {
        Md5Writer {
            inner,
            hasher: Md5::new(),
        }
    }

    pub fn finalize_hex(self) -> (W, String) {
        (self.inner, hex::encode(self.hasher.finalize()))
    }
}

impl<W: Write> Write for Md5Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.hasher.update(&buf[..count]);
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
