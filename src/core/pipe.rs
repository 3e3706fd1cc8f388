//! Anonymous pipe ends for pseudo console I/O

use std::io::{self, ErrorKind, Read, Write};

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows::Win32::System::Pipes::{CreatePipe, PeekNamedPipe};
use windows::Win32::System::IO::CancelIoEx;

use super::error::os_error;

/// A handle closed on drop
#[derive(Debug)]
pub struct OwnedHandle(HANDLE);

// Safety: kernel handles may be used and closed from any thread
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    /// Take ownership of `handle`.
    ///
    /// # Safety
    /// `handle` must be open and not owned by anything else.
    pub unsafe fn from_raw(handle: HANDLE) -> Self {
        Self(handle)
    }

    pub fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

/// One end of an anonymous pipe
///
/// Reads and writes go through `&PipeEnd`, so a shared end can be written
/// from one thread while another cancels its pending I/O.
#[derive(Debug)]
pub struct PipeEnd(OwnedHandle);

impl PipeEnd {
    pub fn raw(&self) -> HANDLE {
        self.0.raw()
    }

    /// Abort any read or write pending on this end, from any thread.
    pub fn cancel_io(&self) {
        unsafe {
            let _ = CancelIoEx(self.raw(), None);
        }
    }

    /// Bytes ready to be read without blocking.
    pub fn available(&self) -> io::Result<usize> {
        let mut available: u32 = 0;
        unsafe {
            PeekNamedPipe(self.raw(), None, 0, None, Some(&mut available), None).map_err(|e| os_error(&e))?;
        }
        Ok(available as usize)
    }
}

impl Read for &PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut read: u32 = 0;
        unsafe {
            ReadFile(self.raw(), Some(buf), Some(&mut read), None).map_err(|e| os_error(&e))?;
        }
        Ok(read as usize)
    }
}

impl Write for &PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written: u32 = 0;
        unsafe {
            WriteFile(self.raw(), Some(buf), Some(&mut written), None).map_err(|e| os_error(&e))?;
        }
        Ok(written as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A unidirectional pipe: bytes written to `write` come out of `read`
#[derive(Debug)]
pub struct PipeChannel {
    pub read: PipeEnd,
    pub write: PipeEnd,
}

impl PipeChannel {
    pub fn create() -> io::Result<Self> {
        let mut read = HANDLE::default();
        let mut write = HANDLE::default();
        unsafe {
            CreatePipe(&mut read, &mut write, None, 0).map_err(|e| os_error(&e))?;
            Ok(Self {
                read: PipeEnd(OwnedHandle::from_raw(read)),
                write: PipeEnd(OwnedHandle::from_raw(write)),
            })
        }
    }
}

/// Read end that never blocks: reports `WouldBlock` while the pipe is empty
pub struct PeekingReader<P> {
    pipe: P,
}

impl<P: AsRef<PipeEnd>> PeekingReader<P> {
    pub fn new(pipe: P) -> Self {
        Self { pipe }
    }
}

impl<P: AsRef<PipeEnd>> Read for PeekingReader<P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pipe = self.pipe.as_ref();
        let available = pipe.available()?;
        if available == 0 {
            return Err(ErrorKind::WouldBlock.into());
        }
        let len = available.min(buf.len());
        let mut reader: &PipeEnd = pipe;
        reader.read(&mut buf[..len])
    }
}

/// Blocking reader over a shared pipe end
pub struct SharedReader<P>(pub P);

impl<P: AsRef<PipeEnd>> Read for SharedReader<P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut reader: &PipeEnd = self.0.as_ref();
        reader.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_round_trip() {
        let mut channel = PipeChannel::create().unwrap();
        channel.write.write_all(b"ping").unwrap();

        let mut buf = [0u8; 8];
        let n = channel.read.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn test_peeking_reader_would_block_then_broken_pipe() {
        let channel = PipeChannel::create().unwrap();
        let read = std::sync::Arc::new(channel.read);
        let mut reader = PeekingReader::new(std::sync::Arc::clone(&read));

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap_err().kind(), ErrorKind::WouldBlock);

        drop(channel.write);
        assert_eq!(reader.read(&mut buf).unwrap_err().kind(), ErrorKind::BrokenPipe);
    }
}
