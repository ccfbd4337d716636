use std::fs;
use std::io::{self, Write};
use std::path::Path;

use rand::Rng;

const ALPHA_NUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn pseudorandom_string(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHA_NUM[rng.random_range(0..ALPHA_NUM.len())] as char)
        .collect()
}

/// Atomically creates a file with the given contents, overwriting
/// it if one exists.
///
/// The buffer is first written to a temporary file in the same
/// directory and then synced and renamed over the destination, so a
/// crash mid-write never leaves a truncated file behind.
pub fn safe_write_all<P: AsRef<Path>, B: AsRef<[u8]>>(path: P, buf: B) -> io::Result<()> {
    let tmp_ext = "sync-".to_owned() + &pseudorandom_string(6);
    let tmp_path = path.as_ref().with_extension(tmp_ext);
    let mut tmp_file = fs::File::create(tmp_path.clone())?;

    tmp_file.write_all(buf.as_ref())?;
    tmp_file.flush()?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    fs::rename(&tmp_path, path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrites_existing_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        safe_write_all(&path, b"first").unwrap();
        safe_write_all(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        // no temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
