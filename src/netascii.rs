//! netascii transfer-mode translation (RFC 764), applied transparently
//! between the raw file handle and the block chunker so that `blksize`
//! boundaries are computed on the already-translated byte stream.
//!
//! On read (server -> client, RRQ): CR -> CR LF, LF -> CR LF.
//! On write (client -> server, WRQ): CR LF -> LF, CR NUL -> CR.

use std::io::{self, Read, Write};

/// Wraps a `Read` of raw file bytes and yields netascii-translated bytes.
pub struct NetasciiReader<R> {
    inner: R,
    pending: Option<u8>,
    done: bool,
}

impl<R: Read> NetasciiReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: None,
            done: false,
        }
    }
}

impl<R: Read> Read for NetasciiReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        if let Some(b) = self.pending.take() {
            buf[written] = b;
            written += 1;
        }
        while written < buf.len() && !self.done {
            let mut byte = [0u8; 1];
            match self.inner.read(&mut byte)? {
                0 => {
                    self.done = true;
                    break;
                }
                _ => match byte[0] {
                    b'\r' => {
                        buf[written] = b'\r';
                        written += 1;
                        if written < buf.len() {
                            buf[written] = b'\n';
                            written += 1;
                        } else {
                            self.pending = Some(b'\n');
                        }
                    }
                    b'\n' => {
                        buf[written] = b'\r';
                        written += 1;
                        if written < buf.len() {
                            buf[written] = b'\n';
                            written += 1;
                        } else {
                            self.pending = Some(b'\n');
                        }
                    }
                    other => {
                        buf[written] = other;
                        written += 1;
                    }
                },
            }
        }
        Ok(written)
    }
}

/// Wraps a `Write` of raw file bytes; accepts netascii-translated input
/// and writes the un-translated bytes through.
pub struct NetasciiWriter<W> {
    inner: W,
    pending_cr: bool,
}

impl<W: Write> NetasciiWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending_cr: false,
        }
    }
}

impl<W: Write> Write for NetasciiWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &b in buf {
            if self.pending_cr {
                self.pending_cr = false;
                match b {
                    b'\n' => self.inner.write_all(b"\n")?,
                    0 => self.inner.write_all(b"\r")?,
                    other => {
                        self.inner.write_all(b"\r")?;
                        self.inner.write_all(&[other])?;
                    }
                }
                continue;
            }
            if b == b'\r' {
                self.pending_cr = true;
            } else {
                self.inner.write_all(&[b])?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
