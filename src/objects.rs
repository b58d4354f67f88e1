//! Read/write loose objects: a zlib-compressed `<type> <len>\0<payload>`
//! envelope stored under `<hex[0:2]>/<hex[2:]>` of its own SHA1.
//!
//! Two stores are in play during a run: the origin `.git/objects` directory
//! (only ever read) and the destination directory (only ever written).
//! Both sides are content-addressed, so writes are idempotent and safe to
//! race between workers.

use std::{
    fs::{self, File},
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{hash::Sha1, Error, Result};

/// The three object kinds a loose store can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjType {
    Commit,
    Tree,
    Blob,
}

impl ObjType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjType::Commit => "commit",
            ObjType::Tree => "tree",
            ObjType::Blob => "blob",
        }
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"commit" => Some(ObjType::Commit),
            b"tree" => Some(ObjType::Tree),
            b"blob" => Some(ObjType::Blob),
            _ => None,
        }
    }
}

/// Where an object lives inside a store: fan out on the first hash byte.
pub fn obj_path(objdir: &Path, sha1: &Sha1) -> PathBuf {
    let hex = sha1.hex();
    objdir.join(&hex[..2]).join(&hex[2..])
}

/// Writes one loose object and returns its identity.
///
/// Idempotent: an existing file under the derived path is left alone (the
/// store is content-addressed, so its bytes already match). New files go
/// through a temp file in the target directory plus an atomic rename, so
/// concurrent workers writing the same object cannot tear each other up.
pub fn write_obj(objtype: ObjType, payload: &[u8], objdir: &Path) -> Result<Sha1> {
    let mut data = Vec::with_capacity(payload.len() + 16);
    data.extend_from_slice(objtype.as_str().as_bytes());
    data.push(b' ');
    data.extend_from_slice(payload.len().to_string().as_bytes());
    data.push(0);
    data.extend_from_slice(payload);
    let sha1 = Sha1::digest(&data);

    let hex = sha1.hex();
    let basedir = objdir.join(&hex[..2]);
    let objpath = basedir.join(&hex[2..]);
    if objpath.exists() {
        return Ok(sha1);
    }
    fs::create_dir_all(&basedir)?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&data)?;
    write_file_atomic(&objpath, &basedir, &encoder.finish()?)?;
    debug!(hash = %sha1, kind = objtype.as_str(), "wrote object");
    Ok(sha1)
}

/// Reads one loose object and splits the envelope.
///
/// # Returns
/// - `Error::NotFound` if there is no file under the derived path.
/// - `Error::Codec` if the zlib stream will not inflate.
/// - `Error::CorruptObject` if the header is malformed or the declared
///   length does not match the payload.
pub fn read_obj(sha1: &Sha1, objdir: &Path) -> Result<(ObjType, Vec<u8>)> {
    let objpath = obj_path(objdir, sha1);
    let file = File::open(&objpath).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound { hash: sha1.hex() }
        } else {
            Error::Io(err)
        }
    })?;

    let mut data = Vec::new();
    ZlibDecoder::new(BufReader::new(file))
        .read_to_end(&mut data)
        .map_err(|err| Error::Codec {
            hash: sha1.hex(),
            source: err,
        })?;

    let headlen = data
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::corrupt(sha1, "missing header terminator"))?;
    let space = data[..headlen]
        .iter()
        .position(|b| *b == b' ')
        .ok_or_else(|| Error::corrupt(sha1, "missing space in header"))?;
    let objtype = ObjType::from_bytes(&data[..space])
        .ok_or_else(|| Error::corrupt(sha1, "unknown object type"))?;
    let objlen: usize = std::str::from_utf8(&data[space + 1..headlen])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::corrupt(sha1, "unparsable length in header"))?;

    let payload = data.split_off(headlen + 1);
    if payload.len() != objlen {
        return Err(Error::corrupt(
            sha1,
            format!("declared length {objlen}, payload is {} bytes", payload.len()),
        ));
    }
    Ok((objtype, payload))
}

/// Materializes a blob's raw bytes as `<staging_dir>/<hex>.blob`, the name
/// it will carry in the external bucket. Skipped if already staged.
pub fn extract_blob(sha1: &Sha1, staging_dir: &Path, objdir: &Path) -> Result<()> {
    let dest = staging_dir.join(format!("{}.blob", sha1.hex()));
    if dest.exists() {
        return Ok(());
    }
    let (objtype, payload) = read_obj(sha1, objdir)?;
    if objtype != ObjType::Blob {
        return Err(Error::corrupt(
            sha1,
            format!("expected blob, found {}", objtype.as_str()),
        ));
    }
    write_file_atomic(&dest, staging_dir, &payload)?;
    debug!(hash = %sha1, "staged blob");
    Ok(())
}

/// Atomic file write: temp file in `dir`, then rename over `path`.
/// Every caller writes content-addressed data, so when two writers race on
/// the same path the bytes are identical and the last rename wins.
fn write_file_atomic(path: &Path, dir: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|err| Error::Io(err.error))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sha1 = write_obj(ObjType::Blob, b"some payload", dir.path()).unwrap();
        let (objtype, payload) = read_obj(&sha1, dir.path()).unwrap();
        assert_eq!(objtype, ObjType::Blob);
        assert_eq!(payload, b"some payload");
    }

    #[test]
    fn hashes_like_git() {
        // `echo 'test content' | git hash-object --stdin`
        let dir = tempfile::tempdir().unwrap();
        let sha1 = write_obj(ObjType::Blob, b"test content\n", dir.path()).unwrap();
        assert_eq!(sha1.hex(), "d670460b4b4aece5915caf5c68d12f560a9fe3e4");
        assert!(dir
            .path()
            .join("d6")
            .join("70460b4b4aece5915caf5c68d12f560a9fe3e4")
            .exists());
    }

    #[test]
    fn write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_obj(ObjType::Tree, b"", dir.path()).unwrap();
        let second = write_obj(ObjType::Tree, b"", dir.path()).unwrap();
        assert_eq!(first, second);
        // the empty tree, a hash most git users have run into at least once
        assert_eq!(first.hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }

    #[test]
    fn missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let sha1 = Sha1::digest(b"never written");
        assert_matches!(read_obj(&sha1, dir.path()), Err(Error::NotFound { .. }));
    }

    #[test]
    fn garbage_file_is_codec_error() {
        let dir = tempfile::tempdir().unwrap();
        let sha1 = Sha1::digest(b"whatever");
        let objpath = obj_path(dir.path(), &sha1);
        fs::create_dir_all(objpath.parent().unwrap()).unwrap();
        fs::write(&objpath, b"this is not zlib").unwrap();
        assert_matches!(read_obj(&sha1, dir.path()), Err(Error::Codec { .. }));
    }

    fn write_raw_envelope(dir: &Path, sha1: &Sha1, envelope: &[u8]) {
        let objpath = obj_path(dir, sha1);
        fs::create_dir_all(objpath.parent().unwrap()).unwrap();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(envelope).unwrap();
        fs::write(&objpath, encoder.finish().unwrap()).unwrap();
    }

    #[test]
    fn malformed_header() {
        let dir = tempfile::tempdir().unwrap();
        let sha1 = Sha1::digest(b"a");
        write_raw_envelope(dir.path(), &sha1, b"no-nul-byte-here");
        assert_matches!(
            read_obj(&sha1, dir.path()),
            Err(Error::CorruptObject { .. })
        );

        let sha1 = Sha1::digest(b"b");
        write_raw_envelope(dir.path(), &sha1, b"gadget 4\0abcd");
        assert_matches!(
            read_obj(&sha1, dir.path()),
            Err(Error::CorruptObject { .. })
        );
    }

    #[test]
    fn length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let sha1 = Sha1::digest(b"c");
        write_raw_envelope(dir.path(), &sha1, b"blob 99\0abcd");
        assert_matches!(
            read_obj(&sha1, dir.path()),
            Err(Error::CorruptObject { .. })
        );
    }

    #[test]
    fn extract_blob_stages_raw_bytes() {
        let objdir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let sha1 = write_obj(ObjType::Blob, &[0u8, 159, 146, 150], objdir.path()).unwrap();
        extract_blob(&sha1, staging.path(), objdir.path()).unwrap();
        let staged = fs::read(staging.path().join(format!("{}.blob", sha1.hex()))).unwrap();
        assert_eq!(staged, [0u8, 159, 146, 150]);
    }

    #[test]
    fn extract_refuses_non_blob() {
        let objdir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let sha1 = write_obj(ObjType::Tree, b"", objdir.path()).unwrap();
        assert_matches!(
            extract_blob(&sha1, staging.path(), objdir.path()),
            Err(Error::CorruptObject { .. })
        );
    }
}
