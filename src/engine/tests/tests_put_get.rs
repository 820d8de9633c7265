//! Set/query/delete correctness against the in-memory layers and after a
//! flush.
//!
//! ## Layer coverage
//! - `memtable__*`: active memtable only (limits never reached)
//! - `memtable_sstable__*`: tiny limits, data reaches disk tables

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::engine::tests::helpers::*;
    use crate::encoding::MAX_BYTE_LEN;
    use crate::engine::{Engine, EngineConfig, EngineError};
    use crate::wal::WalError;
    use tempfile::TempDir;

    // ----------------------------------------------------------------
    // Memtable-only
    // ----------------------------------------------------------------

    /// # Scenario
    /// A value is readable right after it is set.
    #[test]
    fn memtable__set_query_single_key() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        assert!(!engine.set("hello", "world").unwrap());
        assert_eq!(engine.query("hello").unwrap(), "world");
    }

    #[test]
    fn memtable__query_missing_key_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        let err = engine.query("nope").unwrap_err();
        assert!(matches!(err, EngineError::NotFound));
        assert_eq!(err.to_string(), "key not exists");
    }

    /// # Scenario
    /// The newest of several writes to one key wins.
    #[test]
    fn memtable__overwrite_returns_latest() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        for v in ["one", "two", "three"] {
            engine.set("k", v).unwrap();
        }
        assert_eq!(engine.query("k").unwrap(), "three");
    }

    #[test]
    fn memtable__delete_hides_key_and_set_revives_it() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.set("k", "v").unwrap();
        engine.delete("k").unwrap();
        assert!(matches!(engine.query("k"), Err(EngineError::NotFound)));

        engine.set("k", "again").unwrap();
        assert_eq!(engine.query("k").unwrap(), "again");
    }

    #[test]
    fn memtable__delete_of_unknown_key_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.delete("ghost").unwrap();
        assert!(matches!(engine.query("ghost"), Err(EngineError::NotFound)));
        assert_eq!(engine.stats().unwrap().active_len, 1);
    }

    #[test]
    fn memtable__empty_value_is_a_value() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.set("k", "").unwrap();
        assert_eq!(engine.query("k").unwrap(), "");
    }

    #[test]
    fn memtable__unicode_keys_and_values() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.set("ключ", "значение").unwrap();
        engine.set("鍵", "🦀").unwrap();
        assert_eq!(engine.query("ключ").unwrap(), "значение");
        assert_eq!(engine.query("鍵").unwrap(), "🦀");
    }

    // ----------------------------------------------------------------
    // Memtable + disk tables
    // ----------------------------------------------------------------

    /// # Scenario
    /// Many keys written with tiny limits end up spread over every layer
    /// and remain readable before and after a flush.
    #[test]
    fn memtable_sstable__bulk_keys_survive_flush() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), config(4, 3)).unwrap();

        fill(&engine, 0..100);
        for i in 0..100 {
            assert_eq!(engine.query(&key(i)).unwrap(), value(i));
        }

        engine.flush().unwrap();
        let stats = engine.stats().unwrap();
        assert_eq!(stats.active_len, 0);
        assert_eq!(stats.immutable_count, 0);
        assert!(stats.disk_tables > 0);

        for i in 0..100 {
            assert_eq!(engine.query(&key(i)).unwrap(), value(i));
        }
    }

    #[test]
    fn memtable_sstable__large_values() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), tiny_config()).unwrap();

        let big = "x".repeat(256 * 1024);
        engine.set("big", big.clone()).unwrap();
        engine.set("small", "s").unwrap();
        engine.flush().unwrap();

        assert_eq!(engine.query("big").unwrap(), big);
        assert_eq!(engine.query("small").unwrap(), "s");
    }

    #[test]
    fn memtable_sstable__tombstone_on_disk_hides_key() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), tiny_config()).unwrap();

        engine.set("k", "v").unwrap();
        engine.flush().unwrap();
        engine.delete("k").unwrap();
        engine.flush().unwrap();

        assert_eq!(engine.stats().unwrap().disk_tables, 2);
        assert!(matches!(engine.query("k"), Err(EngineError::NotFound)));
    }

    // ----------------------------------------------------------------
    // Config
    // ----------------------------------------------------------------

    #[test]
    fn zero_limits_are_rejected() {
        let tmp = TempDir::new().unwrap();
        for cfg in [config(0, 1), config(1, 0)] {
            let err = Engine::open(tmp.path(), cfg).unwrap_err();
            assert!(matches!(err, EngineError::InvalidConfig(_)));
        }
        assert!(files_with_ext(tmp.path(), "wal").is_empty());
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.block_key_limit, 1000);
        assert_eq!(cfg.table_block_limit, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn open_creates_missing_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nested").join("db");
        let engine = Engine::open(&root, memtable_only_config()).unwrap();

        engine.set("a", "1").unwrap();
        assert_eq!(files_with_ext(&root, "wal"), vec!["0.wal"]);
    }

    /// # Scenario
    /// A value longer than the encoding limit is written between two
    /// ordinary writes, then the engine is reopened.
    ///
    /// # Expected behavior
    /// The oversized write fails and is neither logged nor applied. The
    /// other writes survive the reopen.
    #[test]
    fn memtable__oversized_value_is_rejected_and_store_reopens() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();

        {
            let engine = Engine::open(dir, memtable_only_config()).unwrap();
            engine.set("before", "1").unwrap();
            let err = engine
                .set("big", "x".repeat(MAX_BYTE_LEN as usize + 1))
                .unwrap_err();
            assert!(matches!(err, EngineError::Wal(WalError::Command(_))));
            assert!(matches!(engine.query("big"), Err(EngineError::NotFound)));
            engine.set("after", "2").unwrap();
            assert_eq!(engine.stats().unwrap().active_len, 2);
        }

        let engine = Engine::open(dir, memtable_only_config()).unwrap();
        assert_eq!(engine.query("before").unwrap(), "1");
        assert_eq!(engine.query("after").unwrap(), "2");
        assert!(matches!(engine.query("big"), Err(EngineError::NotFound)));
    }

    #[test]
    fn memtable__writes_after_close_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();
        engine.set("a", "1").unwrap();
        engine.close().unwrap();

        assert!(matches!(engine.set("b", "2"), Err(EngineError::Closed)));
        assert!(matches!(engine.delete("a"), Err(EngineError::Closed)));
        assert_eq!(engine.query("a").unwrap(), "1");
        assert!(matches!(engine.query("b"), Err(EngineError::NotFound)));
    }
}
