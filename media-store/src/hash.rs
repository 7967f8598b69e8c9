use std::{fs::File, io::Read, path::Path};

const CHUNK: usize = 64 * 1024;

/// Lowercase hex MD5 of everything `reader` yields.
pub fn md5_hex<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<String> {
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(format!("{:x}", ctx.compute()))
}

pub fn md5_file(path: &Path) -> std::io::Result<String> {
    md5_hex(&mut File::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(
            md5_hex(&mut &b""[..]).unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            md5_hex(&mut &b"hello"[..]).unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn digest_does_not_depend_on_chunking() {
        let data = vec![7u8; CHUNK * 3 + 17];
        let whole = format!("{:x}", md5::compute(&data));
        assert_eq!(md5_hex(&mut &data[..]).unwrap(), whole);
        assert_eq!(whole.len(), 32);
    }
}
