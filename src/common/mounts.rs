//! Mount table lookups.

use std::fs;
use std::path::{Path, PathBuf};

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Mount points currently listed in `/proc/self/mountinfo`.
pub fn mount_points() -> Vec<PathBuf> {
    fs::read_to_string(MOUNTINFO)
        .map(|text| parse_mountinfo(&text))
        .unwrap_or_default()
}

/// Whether `path` is currently a mount point.
pub fn is_mount_point(path: &Path) -> bool {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    mount_points().iter().any(|m| *m == path)
}

/// Field 5 of each mountinfo line, with the kernel's octal escapes decoded.
fn parse_mountinfo(text: &str) -> Vec<PathBuf> {
    text.lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(|field| PathBuf::from(unescape(field)))
        .collect()
}

fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let octal = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(octal, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mountinfo() {
        let text = "\
22 1 259:2 / / rw,relatime shared:1 - ext4 /dev/nvme0n1p2 rw
95 22 8:17 / /run/media/user/WIN\\040USB rw,nosuid shared:50 - vfat /dev/sdb1 rw
";
        let mounts = parse_mountinfo(text);
        assert_eq!(mounts[0], PathBuf::from("/"));
        assert_eq!(mounts[1], PathBuf::from("/run/media/user/WIN USB"));
    }

    #[test]
    fn test_root_is_mounted() {
        assert!(is_mount_point(Path::new("/")));
    }
}
