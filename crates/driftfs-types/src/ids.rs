strong_type!(Ino, u64);
strong_type!(Uid, u32);
strong_type!(Gid, u32);

/// The root directory inode number.
pub const ROOT_INO: Ino = Ino(1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ino() {
        let ino = Ino(12345);
        assert_eq!(*ino, 12345u64);
        assert_eq!(format!("{:?}", ino), "Ino(12345)");
    }

    #[test]
    fn test_root_ino() {
        assert_eq!(*ROOT_INO, 1);
    }

    #[test]
    fn test_uid_gid() {
        let uid = Uid(1000);
        let gid = Gid(1000);
        assert_eq!(*uid, 1000u32);
        assert_eq!(*gid, 1000u32);
    }
}
