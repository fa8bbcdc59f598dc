//! Body chunks: in-memory buffers or regions of open files

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

/// A region of a file, to be sent without copying it through userspace
/// where the transport can manage that
#[derive(Debug, Clone)]
pub struct FileRef {
    file: Arc<File>,
    offset: u64,
    length: u64
}

impl FileRef {
    pub fn new(file: File, offset: u64, length: u64) -> FileRef {
        FileRef { file: Arc::new(file), offset: offset, length: length }
    }

    /// The whole file, from its current metadata
    pub fn whole(file: File) -> io::Result<FileRef> {
        let length = file.metadata()?.len();
        Ok(FileRef::new(file, 0, length))
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Copies the referenced region into `sink`
    pub fn copy_to<W: Write>(&self, sink: &mut W) -> io::Result<u64> {
        let mut file = &*self.file;
        file.seek(SeekFrom::Start(self.offset))?;
        let copied = io::copy(&mut file.take(self.length), sink)?;
        if copied != self.length {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof,
                                      "file region shorter than announced"));
        }
        Ok(copied)
    }

    /// Appends the referenced region to `buffer`
    pub fn fill(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        self.copy_to(buffer).map(|_| ())
    }
}

/// One piece of a message body
#[derive(Debug, Clone)]
pub enum BodyChunk {
    Buffer(Vec<u8>),
    File(FileRef)
}

impl BodyChunk {
    pub fn empty() -> BodyChunk {
        BodyChunk::Buffer(Vec::new())
    }

    pub fn len(&self) -> u64 {
        match *self {
            BodyChunk::Buffer(ref data) => data.len() as u64,
            BodyChunk::File(ref file) => file.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for BodyChunk {
    fn from(data: Vec<u8>) -> BodyChunk {
        BodyChunk::Buffer(data)
    }
}

impl<'a> From<&'a [u8]> for BodyChunk {
    fn from(data: &'a [u8]) -> BodyChunk {
        BodyChunk::Buffer(Vec::from(data))
    }
}

impl From<String> for BodyChunk {
    fn from(data: String) -> BodyChunk {
        BodyChunk::Buffer(data.into_bytes())
    }
}

impl<'a> From<&'a str> for BodyChunk {
    fn from(data: &'a str) -> BodyChunk {
        BodyChunk::Buffer(Vec::from(data.as_bytes()))
    }
}

impl From<FileRef> for BodyChunk {
    fn from(file: FileRef) -> BodyChunk {
        BodyChunk::File(file)
    }
}
