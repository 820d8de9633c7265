//! Happy-path append / replay / remove behaviour.

#[cfg(test)]
mod tests {
    use crate::command::Command;
    use crate::encoding::MAX_BYTE_LEN;
    use crate::wal::tests::helpers::*;
    use crate::wal::{self, Wal, WalError};
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_replay_in_order() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = wal::wal_path(tmp.path(), 0);
        let mut log = Wal::open(&path, true).unwrap();

        let cmds = sample_commands(10);
        for cmd in &cmds {
            log.append(cmd).unwrap();
        }
        assert_eq!(log.records(), 10);
        assert!(!log.is_empty());

        let replayed: Vec<Command> = log
            .replay_iter()
            .unwrap()
            .collect::<Result<_, WalError>>()
            .unwrap();
        assert_eq!(replayed, cmds);
    }

    #[test]
    fn test_reopen_appends_after_existing_records() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = wal::wal_path(tmp.path(), 3);
        {
            let mut log = Wal::open(&path, false).unwrap();
            log.append(&Command::set("a", "1")).unwrap();
        }
        let mut log = Wal::open(&path, false).unwrap();
        assert_eq!(log.generation(), 3);
        assert!(!log.is_empty());
        log.append(&Command::set("b", "2")).unwrap();
        drop(log);

        let (cmds, err) = replay_results(&path);
        assert!(err.is_none());
        assert_eq!(cmds, vec![Command::set("a", "1"), Command::set("b", "2")]);
    }

    /// Key and value are each under the length cap, but the whole record
    /// is not.
    #[test]
    fn test_oversized_record_is_rejected_before_writing() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = wal::wal_path(tmp.path(), 0);
        let mut log = Wal::open(&path, false).unwrap();
        log.append(&Command::set("a", "1")).unwrap();
        let len_before = fs::metadata(&path).unwrap().len();

        let value = "x".repeat(MAX_BYTE_LEN as usize - 4);
        let err = log.append(&Command::set("k", value)).unwrap_err();
        assert!(matches!(err, WalError::Command(_)));
        assert_eq!(log.records(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), len_before);

        log.append(&Command::set("b", "2")).unwrap();
        drop(log);

        let (cmds, err) = replay_results(&path);
        assert!(err.is_none());
        assert_eq!(cmds, vec![Command::set("a", "1"), Command::set("b", "2")]);
    }

    #[test]
    fn test_empty_log_replays_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = wal::wal_path(tmp.path(), 1);
        let log = Wal::open(&path, false).unwrap();
        assert!(log.is_empty());
        assert_eq!(log.replay_iter().unwrap().count(), 0);
    }

    #[test]
    fn test_replay_from_any_reader() {
        let tmp = TempDir::new().unwrap();
        let path = wal::wal_path(tmp.path(), 0);
        let mut log = Wal::open(&path, false).unwrap();
        log.append(&Command::set("k", "v")).unwrap();
        log.append(&Command::delete("k")).unwrap();
        drop(log);

        let bytes = fs::read(&path).unwrap();
        let cmds: Vec<Command> = wal::replay(Cursor::new(bytes))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(cmds, vec![Command::set("k", "v"), Command::delete("k")]);
    }

    #[test]
    fn test_zero_length_record_terminates() {
        let tmp = TempDir::new().unwrap();
        let path = wal::wal_path(tmp.path(), 0);
        let mut log = Wal::open(&path, false).unwrap();
        log.append(&Command::set("a", "1")).unwrap();
        drop(log);

        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(b"garbage after terminator");
        fs::write(&path, &bytes).unwrap();

        let (cmds, err) = replay_results(&path);
        assert!(err.is_none());
        assert_eq!(cmds, vec![Command::set("a", "1")]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = wal::wal_path(tmp.path(), 7);
        let log = Wal::open(&path, false).unwrap();
        assert!(path.exists());
        log.remove().unwrap();
        assert!(!path.exists());

        let log = Wal::open(&path, false).unwrap();
        fs::remove_file(&path).unwrap();
        log.remove().unwrap();
    }

    #[test]
    fn test_bad_file_name_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = Wal::open(tmp.path().join("wal-1.log"), false).unwrap_err();
        assert!(matches!(err, WalError::Io(_)));
    }

    #[test]
    fn test_parse_generation() {
        use std::path::Path;
        assert_eq!(wal::parse_generation(Path::new("/x/42.wal")), Some(42));
        assert_eq!(wal::parse_generation(Path::new("42.sdb")), None);
        assert_eq!(wal::parse_generation(Path::new("abc.wal")), None);
    }
}
