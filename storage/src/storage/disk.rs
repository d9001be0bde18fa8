use crate::Error;
use llmq_utils::{from_hex, hex};
use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};

/// File-backed storage rooted at a directory.
///
/// Each partition is a directory and each blob a file named by the hex encoding of its name.
#[derive(Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn partition_path(&self, partition: &str) -> Result<PathBuf, Error> {
        super::validate_partition_name(partition)?;
        Ok(self.root.join(partition))
    }
}

impl crate::Storage for Storage {
    type Blob = Blob;

    fn open(&self, partition: &str, name: &[u8]) -> Result<(Blob, u64), Error> {
        let path = self.partition_path(partition)?;
        fs::create_dir_all(&path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(hex(name)))?;
        let len = file.metadata()?.len();
        Ok((
            Blob {
                file: Arc::new(Mutex::new(file)),
            },
            len,
        ))
    }

    fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error> {
        let path = self.partition_path(partition)?;
        let missing = |err: std::io::Error, blob: Option<&[u8]>| match (err.kind(), blob) {
            (ErrorKind::NotFound, Some(name)) => Error::BlobMissing(partition.into(), hex(name)),
            (ErrorKind::NotFound, None) => Error::PartitionMissing(partition.into()),
            _ => Error::Io(err),
        };
        match name {
            Some(name) => fs::remove_file(path.join(hex(name))).map_err(|e| missing(e, Some(name))),
            None => fs::remove_dir_all(path).map_err(|e| missing(e, None)),
        }
    }

    fn scan(&self, partition: &str) -> Result<Vec<Vec<u8>>, Error> {
        let path = self.partition_path(partition)?;
        let entries = fs::read_dir(&path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => Error::PartitionMissing(partition.into()),
            _ => Error::Io(err),
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str().and_then(from_hex) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// A blob backed by a file.
#[derive(Clone)]
pub struct Blob {
    file: Arc<Mutex<File>>,
}

impl crate::Blob for Blob {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), Error> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf).map_err(|err| match err.kind() {
            ErrorKind::UnexpectedEof => Error::BlobInsufficientLength,
            _ => Error::Io(err),
        })
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), Error> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn resize(&self, len: u64) -> Result<(), Error> {
        self.file.lock().unwrap().set_len(len)?;
        Ok(())
    }

    fn sync(&self) -> Result<(), Error> {
        self.file.lock().unwrap().sync_all()?;
        Ok(())
    }
}
